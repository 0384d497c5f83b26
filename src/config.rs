use config::{Config, ConfigError, File};
use serde::Deserialize;

/// PostgreSQL connection configuration.
///
/// Backs the persistent store: pools, transactions (candidate and
/// classified), and addresses.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Ordered-index (leaderboard) backend configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct RedisSettings {
    pub url: String,
    #[serde(default = "default_index_key")]
    pub leaderboard_key: String,
}

fn default_index_key() -> String {
    "lambotrack:leaderboard".to_string()
}

/// Upstream chain-event API configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub bearer_key: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_requests_per_second() -> u32 {
    10
}

/// Indexer-wide behavior configuration: tracked asset, seed pool, batching,
/// and the collaborator config this crate consumes but does not itself use
/// (`jwt_secret`, `allowed_origins`) on behalf of out-of-scope surfaces.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexerSettings {
    pub tracked_asset_master: String,
    pub initial_pool_address: String,
    pub start_date: chrono::DateTime<chrono::Utc>,
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: usize,
    pub jwt_secret: String,
    #[serde(default)]
    pub allowed_origins: String,
}

fn default_worker_batch_size() -> usize {
    10
}

/// Root application configuration, loaded once from `config.yaml` at
/// startup with environment-variable overrides layered on top.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub redis: RedisSettings,
    pub upstream: UpstreamSettings,
    pub indexer: IndexerSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(config::Environment::with_prefix("LAMBOTRACK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_batch_size_matches_spec() {
        assert_eq!(default_worker_batch_size(), 10);
    }
}
