use std::time::{Duration, Instant};

/// Repeating timer bound to one subject. The controller owns at most one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTimer {
    subject: String,
    interval: Duration,
    armed_at: Instant,
}

impl RefreshTimer {
    pub fn arm(subject: impl Into<String>, interval: Duration, now: Instant) -> Self {
        Self {
            subject: subject.into(),
            interval,
            armed_at: now,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn next_due(&self) -> Instant {
        self.armed_at + self.interval
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_due().saturating_duration_since(now)
    }

    /// Fires at most once per call; the next interval counts from `now`.
    pub fn poll(&mut self, now: Instant) -> Option<&str> {
        if now < self.next_due() {
            return None;
        }
        self.armed_at = now;
        Some(&self.subject)
    }
}
