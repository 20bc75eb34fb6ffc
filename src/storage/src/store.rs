use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::{ContentId, ViewCounter};

/// Keyed table of view counters, (content id, replica id) -> row.
///
/// Implementations must make `atomic_increment` and `set_if_greater` single
/// atomic read-modify-write operations per key: N concurrent increments of
/// one key must yield exactly N, and two racing merges for one key must
/// leave the larger value.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn exists(&self, content_id: ContentId, replica_id: &str) -> StorageResult<bool>;

    async fn get(&self, content_id: ContentId, replica_id: &str) -> StorageResult<Option<ViewCounter>>;

    /// Add one to the row, creating it at 1 if absent. Returns the new count.
    async fn atomic_increment(&self, content_id: ContentId, replica_id: &str, now: u64) -> StorageResult<u64>;

    /// Store `candidate` if it exceeds the current count or the row is absent.
    /// Returns true if the row changed.
    async fn set_if_greater(
        &self,
        content_id: ContentId,
        replica_id: &str,
        candidate: u64,
        now: u64,
    ) -> StorageResult<bool>;

    /// Sum over every replica's row for the content (0 when there are none)
    async fn sum_by_content_id(&self, content_id: ContentId) -> StorageResult<u64>;

    async fn rows_for_content_id(&self, content_id: ContentId) -> StorageResult<Vec<ViewCounter>>;

    async fn rows_for_replica_id(&self, replica_id: &str) -> StorageResult<Vec<ViewCounter>>;

    /// Number of distinct content ids tracked
    async fn content_count(&self) -> StorageResult<usize>;
}
