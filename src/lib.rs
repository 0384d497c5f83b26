pub mod config;
pub mod cron;
pub mod db;
pub mod ratelimit;
pub mod upstream;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use cron::{CronScheduler, CronSettings};
pub use db::Database;
pub use ratelimit::RateLimiter;
pub use worker::PoolManager;
