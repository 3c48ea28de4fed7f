use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::http_client::http_client;

const AVATAR_CDN: &str = "https://cdn.discordapp.com/avatars";
const DEFAULT_AVATAR_URL: &str = "https://cdn.discordapp.com/embed/avatars/0.png";
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRecord {
    pub username: String,
    pub id: String,
    pub avatar: Option<String>,
    pub level: u32,
    pub message_xp: u64,
    pub rank: u32,
}

impl StatsRecord {
    pub fn avatar_url(&self) -> String {
        match self.avatar.as_deref() {
            Some(avatar) => format!("{AVATAR_CDN}/{}/{avatar}.png", self.id),
            None => DEFAULT_AVATAR_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStats {
    username: String,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    avatar: Option<String>,
    level: u32,
    message_xp: u64,
    rank: u32,
}

/// Parses a lookup body. `Ok(None)` means the service answered but had no record.
pub fn parse_stats_json(raw: &str) -> Result<Option<StatsRecord>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(None);
    }

    let stats: RawStats = serde_json::from_str(trimmed).context("invalid stats json")?;
    let username = stats.username.trim().to_string();
    if username.is_empty() {
        bail!("stats record has empty username");
    }
    if stats.rank == 0 {
        bail!("stats record has rank 0");
    }
    let id = match stats.id {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => return Err(anyhow!("unexpected id value: {other}")),
    };
    let avatar = stats.avatar.filter(|a| !a.trim().is_empty());

    Ok(Some(StatsRecord {
        username,
        id,
        avatar,
        level: stats.level,
        message_xp: stats.message_xp,
        rank: stats.rank,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    Timeout,
    Network,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Timeout => f.write_str("timeout"),
            FetchFailure::Network => f.write_str("network"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(StatsRecord),
    NotFound,
    Failed(FetchFailure),
}

/// Cooperative cancellation flag shared between the controller and a lookup.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct FetchCommand {
    pub ticket: u64,
    pub username: String,
    pub silent: bool,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCompletion {
    pub ticket: u64,
    pub username: String,
    pub silent: bool,
    pub outcome: FetchOutcome,
}

pub trait StatsService: Send + Sync {
    /// `Ok(None)` when the leaderboard has no entry for `username`.
    fn lookup(
        &self,
        username: &str,
        cancel: &CancelToken,
    ) -> std::result::Result<Option<StatsRecord>, FetchFailure>;
}

pub struct HttpStatsService {
    api_url: String,
    timeout: Duration,
}

impl HttpStatsService {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_url: api_url.into(),
            timeout,
        }
    }

    fn request(&self, username: &str) -> Result<Option<StatsRecord>> {
        let client = http_client()?;
        let resp = client
            .get(&self.api_url)
            .query(&[("username", username)])
            .timeout(self.timeout)
            .send()
            .context("request failed")?;
        let status = resp.status();
        if status.is_client_error() {
            return Ok(None);
        }
        let body = resp.text().context("failed reading body")?;
        if !status.is_success() {
            return Err(anyhow!("http {}: {}", status, body));
        }
        parse_stats_json(&body)
    }
}

impl StatsService for HttpStatsService {
    // The blocking client cannot abort a request mid-flight, so the token is
    // only honored before the socket is opened.
    fn lookup(
        &self,
        username: &str,
        cancel: &CancelToken,
    ) -> std::result::Result<Option<StatsRecord>, FetchFailure> {
        if cancel.is_cancelled() {
            return Err(FetchFailure::Network);
        }
        self.request(username).map_err(|err| failure_from_error(&err))
    }
}

fn failure_from_error(err: &anyhow::Error) -> FetchFailure {
    let timed_out = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|cause| cause.is_timeout());
    if timed_out {
        FetchFailure::Timeout
    } else {
        FetchFailure::Network
    }
}

type LookupResult = std::result::Result<Option<StatsRecord>, FetchFailure>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchProgress {
    Running,
    Done(FetchCompletion),
    Cancelled,
}

/// A lookup running on its own thread, bounded by the fetcher's deadline.
pub struct PendingFetch {
    cmd: FetchCommand,
    rx: Receiver<LookupResult>,
    started: Instant,
    deadline: Duration,
}

impl PendingFetch {
    pub fn ticket(&self) -> u64 {
        self.cmd.ticket
    }

    /// Waits at most `wait` for the lookup. A missed deadline trips the token
    /// and resolves as a timeout; a caller cancel resolves as `Cancelled`.
    pub fn poll(&self, wait: Duration) -> FetchProgress {
        if self.cmd.cancel.is_cancelled() {
            return FetchProgress::Cancelled;
        }
        let remaining = self.deadline.saturating_sub(self.started.elapsed());
        if remaining.is_zero() {
            self.cmd.cancel.cancel();
            return self.done(FetchOutcome::Failed(FetchFailure::Timeout));
        }
        match self.rx.recv_timeout(remaining.min(wait)) {
            Ok(result) => {
                if self.cmd.cancel.is_cancelled() {
                    return FetchProgress::Cancelled;
                }
                self.done(match result {
                    Ok(Some(record)) => FetchOutcome::Found(record),
                    Ok(None) => FetchOutcome::NotFound,
                    Err(failure) => FetchOutcome::Failed(failure),
                })
            }
            Err(RecvTimeoutError::Timeout) => FetchProgress::Running,
            // Lookup thread died (or never started) without answering.
            Err(RecvTimeoutError::Disconnected) => {
                self.done(FetchOutcome::Failed(FetchFailure::Network))
            }
        }
    }

    fn done(&self, outcome: FetchOutcome) -> FetchProgress {
        FetchProgress::Done(FetchCompletion {
            ticket: self.cmd.ticket,
            username: self.cmd.username.clone(),
            silent: self.cmd.silent,
            outcome,
        })
    }
}

/// Runs lookups against a service, each bounded by `deadline`.
pub struct StatsFetcher {
    service: Arc<dyn StatsService>,
    deadline: Duration,
}

impl StatsFetcher {
    pub fn new(service: Arc<dyn StatsService>, deadline: Duration) -> Self {
        Self { service, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Starts the lookup without waiting. `None` if the command is already
    /// cancelled.
    pub fn start(&self, cmd: FetchCommand) -> Option<PendingFetch> {
        if cmd.cancel.is_cancelled() {
            return None;
        }

        let (tx, rx) = mpsc::channel();
        let service = Arc::clone(&self.service);
        let name = cmd.username.clone();
        let token = cmd.cancel.clone();
        // On spawn failure the sender is dropped and poll reports Network.
        let _ = thread::Builder::new()
            .name("stats-lookup".to_string())
            .spawn(move || {
                let _ = tx.send(service.lookup(&name, &token));
            });

        Some(PendingFetch {
            cmd,
            rx,
            started: Instant::now(),
            deadline: self.deadline,
        })
    }

    /// Blocks until the lookup resolves, the deadline passes, or the command's
    /// token is cancelled. Cancellation by the caller yields `None`; a missed
    /// deadline trips the token and yields a timeout completion.
    pub fn fetch(&self, cmd: &FetchCommand) -> Option<FetchCompletion> {
        let pending = self.start(cmd.clone())?;
        loop {
            match pending.poll(CANCEL_POLL) {
                FetchProgress::Running => continue,
                FetchProgress::Done(completion) => return Some(completion),
                FetchProgress::Cancelled => return None,
            }
        }
    }
}
