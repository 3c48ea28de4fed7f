use std::env;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:3000/api/stats";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_REFRESH_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsSource {
    Http,
    Demo,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub source: StatsSource,
    pub timeout: Duration,
    pub refresh_interval: Duration,
    pub initial_query: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            source: StatsSource::Http,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            initial_query: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_url = lookup("RANK_CHECK_API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let source = match lookup("RANK_CHECK_SOURCE")
            .map(|val| val.trim().to_lowercase())
            .as_deref()
        {
            Some("demo") => StatsSource::Demo,
            _ => StatsSource::Http,
        };
        let timeout_secs = lookup("RANK_CHECK_TIMEOUT_SECS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .max(1);
        let refresh_secs = lookup("RANK_CHECK_REFRESH_SECS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_REFRESH_SECS)
            .max(5);
        let initial_query = lookup("RANK_CHECK_QUERY").and_then(non_empty);

        Self {
            api_url,
            source,
            timeout: Duration::from_secs(timeout_secs),
            refresh_interval: Duration::from_secs(refresh_secs),
            initial_query,
        }
    }
}

fn non_empty(val: String) -> Option<String> {
    let trimmed = val.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
