use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};

/// Swap direction, decided from which side of the pool the native coin
/// entered on (`ton_in`/`ton_out`), never reproducing the legacy buy-only
/// classification bug from the original implementation (buy-only, regardless of direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, ToSql, FromSql)]
#[postgres(name = "operation_type")]
pub enum OperationType {
    #[postgres(name = "buy")]
    Buy,
    #[postgres(name = "sell")]
    Sell,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Buy => "buy",
            OperationType::Sell => "sell",
        }
    }
}

/// One row spanning both the candidate and classified transaction states.
/// A candidate has `is_processed = false` and only the first four fields
/// populated; classification promotes it in place and it becomes immutable.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Transaction {
    pub tx_hash: String,
    pub lt: u64,
    pub timestamp: DateTime<Utc>,
    pub pool_id: String,
    pub is_processed: bool,
    pub user_address: Option<String>,
    pub event_id: Option<String>,
    pub operation_type: Option<OperationType>,
    pub ton_amount: Option<f64>,
    pub lambo_amount: Option<f64>,
    pub ton_usd_price: Option<f64>,
}

impl Transaction {
    /// Build a fresh candidate row, as both backfill and live tail do.
    pub fn candidate(tx_hash: String, lt: u64, timestamp: DateTime<Utc>, pool_id: String) -> Self {
        Self {
            tx_hash,
            lt,
            timestamp,
            pool_id,
            is_processed: false,
            user_address: None,
            event_id: None,
            operation_type: None,
            ton_amount: None,
            lambo_amount: None,
            ton_usd_price: None,
        }
    }
}

/// The outcome of classifying one candidate transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedSwap {
    pub user_address: String,
    pub event_id: Option<String>,
    pub operation_type: OperationType,
    pub ton_amount: f64,
    pub lambo_amount: f64,
    pub ton_usd_price: f64,
}

impl ClassifiedSwap {
    pub fn usd_amount(&self) -> f64 {
        self.ton_amount * self.ton_usd_price
    }
}
