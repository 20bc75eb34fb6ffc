use std::sync::Arc;
use log::{debug, info};
use storage::{ContentId, CounterStore, StorageResult};

/// Applies a peer's reported partition value to the local store.
///
/// Each merge touches only the `(content_id, source_replica_id)` row and
/// keeps the larger of the stored and reported counts, so merges commute
/// and replaying the same message is a no-op.
#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn CounterStore>,
    local_id: String,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn CounterStore>, local_id: &str) -> Self {
        MergeEngine {
            store,
            local_id: local_id.to_string(),
        }
    }

    /// Returns true if the stored row changed
    pub async fn merge(&self, content_id: ContentId, source_replica_id: &str, count: u64) -> StorageResult<bool> {
        if source_replica_id == self.local_id {
            // Our own partition echoed back; max() keeps it harmless.
            debug!("Merging own partition for content {} (count {})", content_id, count);
        }

        let now = storage::current_timestamp_ms();
        let changed = self.store
            .set_if_greater(content_id, source_replica_id, count, now)
            .await?;

        if changed {
            info!("Merged content {} from {}: count now {}", content_id, source_replica_id, count);
        } else {
            debug!("Ignored stale sync for content {} from {} (count {})", content_id, source_replica_id, count);
        }
        Ok(changed)
    }
}
