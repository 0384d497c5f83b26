pub mod aggregator;
pub mod backfill;
pub mod classifier;
pub mod live_tail;
pub mod pools;
pub mod reconciler;

pub use pools::PoolManager;
