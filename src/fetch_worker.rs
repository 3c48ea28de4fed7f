use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::stats_fetch::{FetchCommand, FetchCompletion, FetchProgress, PendingFetch, StatsFetcher};

const WORKER_POLL: Duration = Duration::from_millis(25);

/// Starts every received command right away so a manual search and a silent
/// refresh never queue behind each other, then polls the pending lookups and
/// forwards completions. Exits once `cmd_rx` closes and nothing is pending.
pub fn spawn_fetch_worker(
    fetcher: Arc<StatsFetcher>,
    cmd_rx: Receiver<FetchCommand>,
    tx: Sender<FetchCompletion>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut pending: Vec<PendingFetch> = Vec::new();
        let mut open = true;

        while open || !pending.is_empty() {
            if open {
                let received = if pending.is_empty() {
                    cmd_rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
                } else {
                    cmd_rx.recv_timeout(WORKER_POLL)
                };
                match received {
                    Ok(cmd) => pending.extend(fetcher.start(cmd)),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => open = false,
                }
            } else {
                thread::sleep(WORKER_POLL);
            }

            pending.retain(|fetch| match fetch.poll(Duration::ZERO) {
                FetchProgress::Running => true,
                FetchProgress::Done(completion) => {
                    let _ = tx.send(completion);
                    false
                }
                FetchProgress::Cancelled => false,
            });
        }
    })
}
