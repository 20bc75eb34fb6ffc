// Core modules
pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod storage;

// Support modules
pub mod wal;
pub mod sharded;
pub mod crdt;

// Re-export main types for convenience
pub use types::{ContentId, CounterEntry, ViewCounter, current_timestamp_ms, total_views};
pub use error::{StorageError, StorageResult};
pub use config::StorageConfig;
pub use store::CounterStore;
pub use storage::Storage;
pub use sharded::ShardedStorage;
pub use crdt::GCounter;
