mod address;
mod pool;
mod transaction;

pub use address::{Address, SyncStatus};
pub use pool::Pool;
pub use transaction::{ClassifiedSwap, OperationType, Transaction};
