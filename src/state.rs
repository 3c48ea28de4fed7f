use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::refresh::RefreshTimer;
use crate::stats_fetch::{
    CancelToken, FetchCommand, FetchCompletion, FetchFailure, FetchOutcome, StatsRecord,
};
use crate::tier::{self, Tier};
use crate::xp;

pub const NOT_FOUND_MESSAGE: &str = "User not found in Top 2000.";
pub const TIMEOUT_MESSAGE: &str = "Connection slow. Lookup timed out.";
pub const NETWORK_MESSAGE: &str = "Connection failed. Try again.";

const MAX_LOGS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Searching,
    HasResult,
    HasError,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub query: String,
    pub result: Option<StatsRecord>,
    pub phase: Phase,
    pub error_message: Option<String>,
    // Overlay on HasResult while a silent fetch is in flight.
    pub is_refreshing: bool,
    pub last_updated: Option<DateTime<Local>>,
    pub logs: VecDeque<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            query: String::new(),
            result: None,
            phase: Phase::Idle,
            error_message: None,
            is_refreshing: false,
            last_updated: None,
            logs: VecDeque::new(),
        }
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        self.logs.push_back(msg.into());
        while self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedStats {
    pub tier: Tier,
    pub tier_label: &'static str,
    pub tier_color: &'static str,
    pub next_threshold: u64,
    pub progress_fraction: f64,
}

pub fn derive_stats(record: &StatsRecord) -> DerivedStats {
    let level = i64::from(record.level);
    let tier = tier::classify(level);
    DerivedStats {
        tier,
        tier_label: tier.label(),
        tier_color: tier.color(),
        next_threshold: xp::next_threshold(level),
        progress_fraction: xp::progress_fraction(record.message_xp, level),
    }
}

/// Everything the renderer is allowed to see.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub phase: Phase,
    pub query: String,
    pub result: Option<StatsRecord>,
    pub error_message: Option<String>,
    pub is_refreshing: bool,
    pub last_updated: Option<DateTime<Local>>,
    pub derived: Option<DerivedStats>,
}

#[derive(Debug)]
struct InFlight {
    ticket: u64,
    cancel: CancelToken,
}

impl InFlight {
    fn cancel(self) {
        self.cancel.cancel();
    }
}

/// Single owner of the session. Emits fetch commands, absorbs completions.
#[derive(Debug)]
pub struct SearchController {
    session: SessionState,
    refresh_interval: Duration,
    next_ticket: u64,
    manual: Option<InFlight>,
    silent: Option<InFlight>,
    timer: Option<RefreshTimer>,
}

impl SearchController {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            session: SessionState::new(),
            refresh_interval,
            next_ticket: 1,
            manual: None,
            silent: None,
            timer: None,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn timer(&self) -> Option<&RefreshTimer> {
        self.timer.as_ref()
    }

    pub fn manual_in_flight(&self) -> bool {
        self.manual.is_some()
    }

    pub fn push_log(&mut self, msg: impl Into<String>) {
        self.session.push_log(msg);
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.session.query = query.into();
    }

    pub fn push_query_char(&mut self, c: char) {
        self.session.query.push(c);
    }

    pub fn pop_query_char(&mut self) {
        self.session.query.pop();
    }

    pub fn clear_query(&mut self) {
        self.session.query.clear();
    }

    /// Starts a manual lookup for the current query, superseding any manual
    /// lookup still in flight. Blank queries are ignored.
    pub fn submit(&mut self) -> Option<FetchCommand> {
        let username = self.session.query.trim().to_string();
        if username.is_empty() {
            return None;
        }

        if let Some(prev) = self.manual.take() {
            self.session
                .push_log(format!("[INFO] Superseded lookup #{}", prev.ticket));
            prev.cancel();
        }

        let (ticket, cancel) = self.issue_ticket();
        self.manual = Some(InFlight {
            ticket,
            cancel: cancel.clone(),
        });
        self.session.phase = Phase::Searching;
        self.session.push_log(format!("[INFO] Searching {username}"));

        Some(FetchCommand {
            ticket,
            username,
            silent: false,
            cancel,
        })
    }

    /// Emits a silent refresh when the timer is due.
    pub fn poll_refresh(&mut self, now: Instant) -> Option<FetchCommand> {
        if self.session.phase != Phase::HasResult {
            return None;
        }
        let subject = self.timer.as_mut()?.poll(now)?.to_string();
        if self.silent.is_some() {
            self.session
                .push_log("[INFO] Refresh still running, skipping tick");
            return None;
        }

        let (ticket, cancel) = self.issue_ticket();
        self.silent = Some(InFlight {
            ticket,
            cancel: cancel.clone(),
        });
        self.session.is_refreshing = true;

        Some(FetchCommand {
            ticket,
            username: subject,
            silent: true,
            cancel,
        })
    }

    pub fn apply(&mut self, completion: FetchCompletion, now: Instant) {
        if completion.silent {
            self.apply_silent(completion);
        } else {
            self.apply_manual(completion, now);
        }
    }

    fn apply_manual(&mut self, completion: FetchCompletion, now: Instant) {
        if self.manual.as_ref().map(|f| f.ticket) != Some(completion.ticket) {
            return;
        }
        self.manual = None;

        match completion.outcome {
            FetchOutcome::Found(record) => {
                // Manual results win over any refresh still in flight.
                self.cancel_silent();
                self.session.push_log(format!(
                    "[INFO] {} level {} rank #{}",
                    record.username, record.level, record.rank
                ));
                self.timer = Some(RefreshTimer::arm(
                    record.username.clone(),
                    self.refresh_interval,
                    now,
                ));
                self.session.push_log(format!(
                    "[INFO] Auto-refresh every {}s for {}",
                    self.refresh_interval.as_secs(),
                    record.username
                ));
                self.session.result = Some(record);
                self.session.error_message = None;
                self.session.last_updated = Some(Local::now());
                self.session.phase = Phase::HasResult;
            }
            FetchOutcome::NotFound => {
                self.session
                    .push_log(format!("[WARN] {} not found", completion.username));
                self.fail_manual(NOT_FOUND_MESSAGE);
            }
            FetchOutcome::Failed(failure) => {
                self.session.push_log(format!(
                    "[WARN] Lookup for {} failed: {failure}",
                    completion.username
                ));
                let message = match failure {
                    FetchFailure::Timeout => TIMEOUT_MESSAGE,
                    FetchFailure::Network => NETWORK_MESSAGE,
                };
                self.fail_manual(message);
            }
        }
    }

    fn apply_silent(&mut self, completion: FetchCompletion) {
        if self.silent.as_ref().map(|f| f.ticket) != Some(completion.ticket) {
            return;
        }
        self.silent = None;
        self.session.is_refreshing = false;

        let same_subject = self
            .timer
            .as_ref()
            .is_some_and(|t| t.subject() == completion.username);
        match completion.outcome {
            FetchOutcome::Found(record)
                if same_subject && self.session.phase == Phase::HasResult =>
            {
                self.session.result = Some(record);
                self.session.last_updated = Some(Local::now());
            }
            FetchOutcome::Found(_) => {}
            FetchOutcome::NotFound => {
                self.session.push_log(format!(
                    "[WARN] Refresh: {} not found, keeping last result",
                    completion.username
                ));
            }
            FetchOutcome::Failed(failure) => {
                self.session.push_log(format!(
                    "[WARN] Refresh for {} failed: {failure}",
                    completion.username
                ));
            }
        }
    }

    /// Releases a ticket whose command never reached a worker. A manual
    /// lookup fails as a network error; a refresh just lets the next tick run.
    pub fn abandon(&mut self, ticket: u64) {
        if self.manual.as_ref().is_some_and(|f| f.ticket == ticket) {
            if let Some(manual) = self.manual.take() {
                manual.cancel();
            }
            self.session
                .push_log(format!("[WARN] Lookup #{ticket} could not be started"));
            self.fail_manual(NETWORK_MESSAGE);
        } else if self.silent.as_ref().is_some_and(|f| f.ticket == ticket) {
            self.cancel_silent();
        }
    }

    fn fail_manual(&mut self, message: &str) {
        self.session.result = None;
        self.session.error_message = Some(message.to_string());
        self.session.phase = Phase::HasError;
        self.teardown_refresh();
    }

    /// Drops the displayed record and stops background refresh.
    pub fn clear_result(&mut self) {
        if self.session.result.is_none() {
            return;
        }
        self.session.result = None;
        self.session.last_updated = None;
        if self.session.phase == Phase::HasResult {
            self.session.phase = Phase::Idle;
        }
        self.teardown_refresh();
    }

    pub fn end_session(&mut self) {
        if let Some(manual) = self.manual.take() {
            manual.cancel();
        }
        self.teardown_refresh();
    }

    fn teardown_refresh(&mut self) {
        self.cancel_silent();
        if let Some(timer) = self.timer.take() {
            self.session
                .push_log(format!("[INFO] Auto-refresh stopped for {}", timer.subject()));
        }
    }

    fn cancel_silent(&mut self) {
        if let Some(silent) = self.silent.take() {
            silent.cancel();
        }
        self.session.is_refreshing = false;
    }

    fn issue_ticket(&mut self) -> (u64, CancelToken) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        (ticket, CancelToken::new())
    }

    pub fn view(&self) -> SessionView {
        let s = &self.session;
        SessionView {
            phase: s.phase,
            query: s.query.clone(),
            result: s.result.clone(),
            error_message: s.error_message.clone(),
            is_refreshing: s.is_refreshing,
            last_updated: s.last_updated,
            derived: s.result.as_ref().map(derive_stats),
        }
    }
}

impl Drop for SearchController {
    fn drop(&mut self) {
        self.end_session();
    }
}
