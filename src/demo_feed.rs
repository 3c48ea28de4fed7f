use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::stats_fetch::{CancelToken, FetchFailure, StatsRecord, StatsService};
use crate::xp;

const LEADERBOARD_SIZE: u32 = 2000;

/// Offline stand-in for the stats service. Every valid name gets a synthetic
/// record that earns a little XP on each lookup.
pub struct DemoStatsService {
    members: Mutex<HashMap<String, StatsRecord>>,
    latency_ms: (u64, u64),
    failure_rate: f64,
}

impl Default for DemoStatsService {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoStatsService {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            latency_ms: (150, 900),
            failure_rate: 0.05,
        }
    }

    /// No artificial latency or failures.
    pub fn instant() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            latency_ms: (0, 0),
            failure_rate: 0.0,
        }
    }
}

impl StatsService for DemoStatsService {
    fn lookup(
        &self,
        username: &str,
        cancel: &CancelToken,
    ) -> Result<Option<StatsRecord>, FetchFailure> {
        let mut rng = rand::thread_rng();
        let (lo, hi) = self.latency_ms;
        if hi > 0 {
            let mut left = rng.gen_range(lo..=hi);
            while left > 0 {
                if cancel.is_cancelled() {
                    return Err(FetchFailure::Network);
                }
                let step = left.min(50);
                thread::sleep(Duration::from_millis(step));
                left -= step;
            }
        }
        if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            return Err(FetchFailure::Network);
        }

        let key = username.trim().to_lowercase();
        if !is_member_name(&key) {
            return Ok(None);
        }

        let mut members = self.members.lock().map_err(|_| FetchFailure::Network)?;
        let record = members
            .entry(key.clone())
            .or_insert_with(|| seed_record(&key));
        if rng.gen_bool(0.6) {
            gain_xp(record, rng.gen_range(5..40));
        }
        Ok(Some(record.clone()))
    }
}

// Names that cannot exist on the leaderboard.
fn is_member_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && !name.starts_with("ghost")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn seed_record(name: &str) -> StatsRecord {
    let hash = name
        .bytes()
        .fold(0xcbf29ce484222325u64, |acc, b| {
            (acc ^ u64::from(b)).wrapping_mul(0x100000001b3)
        });
    let level = (hash % 70) as u32;
    let threshold = xp::next_threshold(i64::from(level));
    StatsRecord {
        username: name.to_string(),
        id: format!("{}", 100_000_000_000_000_000 + hash % 900_000_000_000_000_000),
        avatar: None,
        level,
        message_xp: (hash >> 8) % threshold,
        rank: ((hash >> 16) % u64::from(LEADERBOARD_SIZE)) as u32 + 1,
    }
}

fn gain_xp(record: &mut StatsRecord, amount: u64) {
    record.message_xp += amount;
    let threshold = xp::next_threshold(i64::from(record.level));
    if record.message_xp >= threshold {
        record.message_xp -= threshold;
        record.level += 1;
        record.rank = record.rank.saturating_sub(1).max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_records_are_stable_and_valid() {
        let a = seed_record("alice");
        let b = seed_record("alice");
        assert_eq!(a, b);
        assert!(a.rank >= 1 && a.rank <= LEADERBOARD_SIZE);
        assert!(a.message_xp < xp::next_threshold(i64::from(a.level)));
    }

    #[test]
    fn ghosts_and_bad_names_are_not_members() {
        let svc = DemoStatsService::instant();
        let token = CancelToken::new();
        assert_eq!(svc.lookup("ghost", &token), Ok(None));
        assert_eq!(svc.lookup("no spaces", &token), Ok(None));
        assert!(matches!(svc.lookup("Alice", &token), Ok(Some(r)) if r.username == "alice"));
    }

    #[test]
    fn level_up_carries_remaining_xp() {
        let mut record = seed_record("carol");
        record.level = 0;
        record.message_xp = 95;
        record.rank = 10;
        gain_xp(&mut record, 10);
        assert_eq!(record.level, 1);
        assert_eq!(record.message_xp, 5);
        assert_eq!(record.rank, 9);
    }
}
