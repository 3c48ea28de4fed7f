pub mod config;
pub mod demo_feed;
pub mod fetch_worker;
pub mod http_client;
pub mod refresh;
pub mod state;
pub mod stats_fetch;
pub mod tier;
pub mod xp;
