use std::sync::Arc;

use crate::config::Settings;

pub mod index;
pub mod models;
pub mod postgres;

pub use index::OrderedIndex;
pub use postgres::PostgresClient;

/// Combined database client: PostgreSQL for relational state (pools,
/// transactions, addresses), Redis for the ordered index backing the
/// leaderboard.
#[derive(Clone)]
pub struct Database {
    pub postgres: Arc<PostgresClient>,
    pub index: Arc<OrderedIndex>,
}

impl Database {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;
        postgres.migrate().await?;

        let index = OrderedIndex::new(settings.redis.clone()).await?;

        Ok(Self {
            postgres: Arc::new(postgres),
            index: Arc::new(index),
        })
    }
}
