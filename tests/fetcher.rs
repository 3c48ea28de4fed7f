use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use rank_check::demo_feed::DemoStatsService;
use rank_check::fetch_worker::spawn_fetch_worker;
use rank_check::state::{Phase, SearchController, TIMEOUT_MESSAGE};
use rank_check::stats_fetch::{
    CancelToken, FetchCommand, FetchCompletion, FetchFailure, FetchOutcome, HttpStatsService,
    StatsFetcher, StatsRecord, StatsService,
};

enum Script {
    Record(u32),
    Absent,
    Fail,
    Hang,
}

struct ScriptedService {
    script: Script,
    calls: AtomicUsize,
    saw_cancel: Arc<AtomicBool>,
}

impl ScriptedService {
    fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            saw_cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl StatsService for ScriptedService {
    fn lookup(
        &self,
        username: &str,
        cancel: &CancelToken,
    ) -> Result<Option<StatsRecord>, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Record(level) => Ok(Some(StatsRecord {
                username: username.to_string(),
                id: "42".to_string(),
                avatar: None,
                level,
                message_xp: 50,
                rank: 3,
            })),
            Script::Absent => Ok(None),
            Script::Fail => Err(FetchFailure::Network),
            Script::Hang => {
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                self.saw_cancel.store(true, Ordering::SeqCst);
                Err(FetchFailure::Network)
            }
        }
    }
}

fn command(username: &str, silent: bool) -> FetchCommand {
    FetchCommand {
        ticket: 7,
        username: username.to_string(),
        silent,
        cancel: CancelToken::new(),
    }
}

fn fetcher(service: Arc<ScriptedService>, deadline: Duration) -> StatsFetcher {
    StatsFetcher::new(service, deadline)
}

#[test]
fn found_record_passes_through() {
    let service = Arc::new(ScriptedService::new(Script::Record(10)));
    let f = fetcher(service.clone(), Duration::from_secs(5));
    let completion = f.fetch(&command("alice", false)).expect("completes");
    assert_eq!(completion.ticket, 7);
    assert!(!completion.silent);
    assert!(matches!(completion.outcome, FetchOutcome::Found(ref r) if r.level == 10));
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn absent_record_is_not_found() {
    let f = fetcher(
        Arc::new(ScriptedService::new(Script::Absent)),
        Duration::from_secs(5),
    );
    let completion = f.fetch(&command("ghost", true)).expect("completes");
    assert!(completion.silent);
    assert_eq!(completion.outcome, FetchOutcome::NotFound);
}

#[test]
fn service_failure_is_network() {
    let f = fetcher(
        Arc::new(ScriptedService::new(Script::Fail)),
        Duration::from_secs(5),
    );
    let completion = f.fetch(&command("alice", false)).expect("completes");
    assert_eq!(
        completion.outcome,
        FetchOutcome::Failed(FetchFailure::Network)
    );
}

#[test]
fn deadline_yields_timeout_and_cancels_lookup() {
    let service = Arc::new(ScriptedService::new(Script::Hang));
    let saw_cancel = service.saw_cancel.clone();
    let f = fetcher(service, Duration::from_millis(120));
    let cmd = command("alice", false);

    let started = Instant::now();
    let completion = f.fetch(&cmd).expect("timeout is an outcome");
    assert!(started.elapsed() >= Duration::from_millis(120));
    assert_eq!(
        completion.outcome,
        FetchOutcome::Failed(FetchFailure::Timeout)
    );
    assert!(cmd.cancel.is_cancelled());

    let wait_until = Instant::now() + Duration::from_secs(2);
    while !saw_cancel.load(Ordering::SeqCst) && Instant::now() < wait_until {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(saw_cancel.load(Ordering::SeqCst));
}

#[test]
fn caller_cancel_yields_nothing() {
    let f = fetcher(
        Arc::new(ScriptedService::new(Script::Hang)),
        Duration::from_secs(10),
    );
    let cmd = command("alice", true);
    let token = cmd.cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        token.cancel();
    });
    assert!(f.fetch(&cmd).is_none());
    canceller.join().unwrap();
}

#[test]
fn pre_cancelled_command_never_calls_service() {
    let service = Arc::new(ScriptedService::new(Script::Record(1)));
    let f = fetcher(service.clone(), Duration::from_secs(5));
    let cmd = command("alice", false);
    cmd.cancel.cancel();
    assert!(f.fetch(&cmd).is_none());
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn manual_timeout_surfaces_and_silent_timeout_does_not() {
    let service = Arc::new(ScriptedService::new(Script::Hang));
    let f = fetcher(service, Duration::from_millis(60));
    let mut ctl = SearchController::new(Duration::from_secs(120));
    let now = Instant::now();

    ctl.set_query("alice");
    let cmd = ctl.submit().unwrap();
    let completion = f.fetch(&cmd).unwrap();
    ctl.apply(completion, now);
    assert_eq!(ctl.view().phase, Phase::HasError);
    assert_eq!(ctl.view().error_message.as_deref(), Some(TIMEOUT_MESSAGE));

    let cmd = ctl.submit().unwrap();
    ctl.apply(found_completion(&cmd), now);
    let before = ctl.view();
    let refresh = ctl.poll_refresh(now + Duration::from_secs(120)).unwrap();
    let completion = f.fetch(&refresh).unwrap();
    assert_eq!(
        completion.outcome,
        FetchOutcome::Failed(FetchFailure::Timeout)
    );
    ctl.apply(completion, now + Duration::from_secs(120));
    let after = ctl.view();
    assert!(!after.is_refreshing);
    assert_eq!(after.result, before.result);
    assert_eq!(after.error_message, None);
}

fn found_completion(cmd: &FetchCommand) -> FetchCompletion {
    FetchCompletion {
        ticket: cmd.ticket,
        username: cmd.username.clone(),
        silent: cmd.silent,
        outcome: FetchOutcome::Found(StatsRecord {
            username: cmd.username.clone(),
            id: "1".to_string(),
            avatar: None,
            level: 10,
            message_xp: 50,
            rank: 3,
        }),
    }
}

#[test]
fn worker_round_trip_through_demo_service() {
    let fetcher = Arc::new(StatsFetcher::new(
        Arc::new(DemoStatsService::instant()),
        Duration::from_secs(5),
    ));
    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let handle = spawn_fetch_worker(fetcher, cmd_rx, tx);

    let mut ctl = SearchController::new(Duration::from_secs(120));
    ctl.set_query("alice");
    cmd_tx.send(ctl.submit().unwrap()).unwrap();
    let completion = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker should answer");
    ctl.apply(completion, Instant::now());
    assert_eq!(ctl.view().phase, Phase::HasResult);
    assert_eq!(ctl.view().result.unwrap().username, "alice");

    ctl.set_query("ghost");
    cmd_tx.send(ctl.submit().unwrap()).unwrap();
    let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    ctl.apply(completion, Instant::now());
    assert_eq!(ctl.view().phase, Phase::HasError);

    drop(cmd_tx);
    handle.join().unwrap();
}

/// Names starting with "slow" block until cancelled; everything else is found.
struct SplitService;

impl StatsService for SplitService {
    fn lookup(
        &self,
        username: &str,
        cancel: &CancelToken,
    ) -> Result<Option<StatsRecord>, FetchFailure> {
        if username.starts_with("slow") {
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            return Err(FetchFailure::Network);
        }
        Ok(Some(StatsRecord {
            username: username.to_string(),
            id: "1".to_string(),
            avatar: None,
            level: 3,
            message_xp: 10,
            rank: 9,
        }))
    }
}

fn numbered(ticket: u64, username: &str) -> FetchCommand {
    FetchCommand {
        ticket,
        username: username.to_string(),
        silent: false,
        cancel: CancelToken::new(),
    }
}

#[test]
fn worker_does_not_queue_behind_a_hung_lookup() {
    let fetcher = Arc::new(StatsFetcher::new(
        Arc::new(SplitService),
        Duration::from_millis(400),
    ));
    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let handle = spawn_fetch_worker(fetcher, cmd_rx, tx);

    cmd_tx.send(numbered(1, "slowpoke")).unwrap();
    cmd_tx.send(numbered(2, "alice")).unwrap();

    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.ticket, 2);
    assert!(matches!(first.outcome, FetchOutcome::Found(_)));

    let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(second.ticket, 1);
    assert_eq!(second.outcome, FetchOutcome::Failed(FetchFailure::Timeout));

    drop(cmd_tx);
    handle.join().unwrap();
}

#[test]
fn worker_drops_cancelled_lookups() {
    let fetcher = Arc::new(StatsFetcher::new(
        Arc::new(SplitService),
        Duration::from_secs(5),
    ));
    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let handle = spawn_fetch_worker(fetcher, cmd_rx, tx);

    let cmd = numbered(3, "slowpoke");
    let cancel = cmd.cancel.clone();
    cmd_tx.send(cmd).unwrap();
    thread::sleep(Duration::from_millis(50));
    cancel.cancel();

    drop(cmd_tx);
    handle.join().unwrap();
    assert!(rx.recv().is_err());
}

/// Answers a single request with `status` and `body` after `delay`, and
/// reports the request line it received.
fn serve_once(
    status: &'static str,
    body: &'static str,
    delay: Duration,
) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        let _ = reader.read_line(&mut request_line);
        let _ = tx.send(request_line.trim_end().to_string());
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) if line == "\r\n" => break,
                Ok(_) => {}
            }
        }
        thread::sleep(delay);
        let headers = [
            format!("HTTP/1.1 {status}"),
            "Content-Type: application/json".to_string(),
            format!("Content-Length: {}", body.len()),
            "Connection: close".to_string(),
        ];
        let response = format!("{}\r\n\r\n{body}", headers.join("\r\n"));
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.flush();
    });
    (format!("http://{addr}/api/stats"), rx)
}

fn http_fetcher(url: String, request_timeout: Duration) -> StatsFetcher {
    StatsFetcher::new(
        Arc::new(HttpStatsService::new(url, request_timeout)),
        Duration::from_secs(5),
    )
}

const ALICE_BODY: &str =
    r#"{"username":"a b&c","id":"42","avatar":null,"level":10,"message_xp":50,"rank":3}"#;

#[test]
fn http_ok_with_record_is_found_and_escapes_username() {
    let (url, requests) = serve_once("200 OK", ALICE_BODY, Duration::ZERO);
    let f = http_fetcher(url, Duration::from_secs(5));

    let completion = f.fetch(&command("a b&c", false)).expect("completes");
    match completion.outcome {
        FetchOutcome::Found(record) => {
            assert_eq!(record.username, "a b&c");
            assert_eq!(record.level, 10);
            assert_eq!(record.rank, 3);
        }
        other => panic!("expected a record, got {other:?}"),
    }
    assert_eq!(
        requests.recv_timeout(Duration::from_secs(1)).unwrap(),
        "GET /api/stats?username=a+b%26c HTTP/1.1"
    );
}

#[test]
fn http_not_found_status_is_not_found() {
    let (url, _requests) = serve_once("404 Not Found", "{}", Duration::ZERO);
    let completion = http_fetcher(url, Duration::from_secs(5))
        .fetch(&command("nobody", false))
        .expect("completes");
    assert_eq!(completion.outcome, FetchOutcome::NotFound);
}

#[test]
fn http_server_error_is_network() {
    let (url, _requests) = serve_once("500 Internal Server Error", "boom", Duration::ZERO);
    let completion = http_fetcher(url, Duration::from_secs(5))
        .fetch(&command("alice", false))
        .expect("completes");
    assert_eq!(
        completion.outcome,
        FetchOutcome::Failed(FetchFailure::Network)
    );
}

#[test]
fn http_html_body_is_network() {
    let (url, _requests) = serve_once("200 OK", "<html>maintenance</html>", Duration::ZERO);
    let completion = http_fetcher(url, Duration::from_secs(5))
        .fetch(&command("alice", false))
        .expect("completes");
    assert_eq!(
        completion.outcome,
        FetchOutcome::Failed(FetchFailure::Network)
    );
}

#[test]
fn http_slow_server_is_timeout() {
    let (url, _requests) = serve_once("200 OK", ALICE_BODY, Duration::from_secs(1));
    let completion = http_fetcher(url, Duration::from_millis(200))
        .fetch(&command("alice", false))
        .expect("completes");
    assert_eq!(
        completion.outcome,
        FetchOutcome::Failed(FetchFailure::Timeout)
    );
}

#[test]
fn http_lookup_with_cancelled_token_never_connects() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let url = format!("http://{}/api/stats", listener.local_addr().unwrap());
    let service = HttpStatsService::new(url, Duration::from_secs(5));

    let cancel = CancelToken::new();
    cancel.cancel();
    assert_eq!(
        service.lookup("alice", &cancel),
        Err(FetchFailure::Network)
    );
    let accepted = listener.accept();
    assert!(matches!(accepted, Err(ref e) if e.kind() == ErrorKind::WouldBlock));
}
