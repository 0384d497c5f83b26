use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};

/// Where an address sits in the late-join reconciliation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, ToSql, FromSql)]
#[postgres(name = "sync_status")]
pub enum SyncStatus {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "syncing")]
    Syncing,
    #[postgres(name = "synced")]
    Synced,
}

/// A tracked end-user wallet and its six running trade-volume totals.
///
/// Addresses are created externally, on proof of ownership, outside this
/// crate's scope; this crate only ever reads, updates, or deactivates them.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Address {
    pub address: String,
    pub buy_ton: f64,
    pub sell_ton: f64,
    pub total_ton: f64,
    pub buy_lambo: f64,
    pub sell_lambo: f64,
    pub total_lambo: f64,
    pub buy_usd: f64,
    pub sell_usd: f64,
    pub total_usd: f64,
    pub sync_status: SyncStatus,
    pub initial_sync_completed: bool,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

