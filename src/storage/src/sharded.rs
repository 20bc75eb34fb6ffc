use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::Arc;
use tokio::sync::RwLock;
use log::info;

use crate::crdt::GCounter;
use crate::types::{ContentId, CounterEntry, ViewCounter};

/// Number of shards (must be power of 2 for efficient hashing)
const DEFAULT_SHARD_COUNT: usize = 64;

/// A single shard holding the counters of a subset of content ids
struct Shard {
    data: HashMap<ContentId, GCounter>,
}

impl Shard {
    fn new() -> Self {
        Shard {
            data: HashMap::new(),
        }
    }
}

/// Sharded counter table for high-concurrency access
///
/// Counters are distributed across shards by the hash of their content id.
/// Each shard has its own RwLock, so writers touching different content
/// ids proceed in parallel and every mutation of a row is a single
/// read-modify-write under that row's shard lock.
pub struct ShardedStorage {
    shards: Vec<Arc<RwLock<Shard>>>,
    shard_count: usize,
}

impl ShardedStorage {
    /// Create a new sharded storage with the default number of shards (64)
    pub fn new() -> Self {
        Self::with_shard_count(DEFAULT_SHARD_COUNT)
    }

    /// Create a new sharded storage with a specific number of shards
    pub fn with_shard_count(count: usize) -> Self {
        let count = count.max(1).next_power_of_two();

        let shards = (0..count)
            .map(|_| Arc::new(RwLock::new(Shard::new())))
            .collect();

        info!("ShardedStorage initialized with {} shards", count);

        ShardedStorage {
            shards,
            shard_count: count,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    #[inline]
    fn shard_index(&self, content_id: ContentId) -> usize {
        let mut hasher = DefaultHasher::new();
        content_id.hash(&mut hasher);
        (hasher.finish() as usize) & (self.shard_count - 1)
    }

    #[inline]
    async fn get_shard(&self, content_id: ContentId) -> tokio::sync::RwLockReadGuard<'_, Shard> {
        let idx = self.shard_index(content_id);
        self.shards[idx].read().await
    }

    #[inline]
    async fn get_shard_mut(&self, content_id: ContentId) -> tokio::sync::RwLockWriteGuard<'_, Shard> {
        let idx = self.shard_index(content_id);
        self.shards[idx].write().await
    }

    // ==================== Point Operations ====================

    pub async fn exists(&self, content_id: ContentId, replica_id: &str) -> bool {
        let shard = self.get_shard(content_id).await;
        shard.data
            .get(&content_id)
            .map(|counter| counter.contains(replica_id))
            .unwrap_or(false)
    }

    pub async fn get(&self, content_id: ContentId, replica_id: &str) -> Option<CounterEntry> {
        let shard = self.get_shard(content_id).await;
        shard.data.get(&content_id)?.entry(replica_id)
    }

    /// Increment a row by one, creating it with a count of 1 if absent.
    ///
    /// `before_commit` receives the post-increment count while the shard lock
    /// is held; if it fails the row is left untouched and the error returned.
    pub async fn increment<F>(
        &self,
        content_id: ContentId,
        replica_id: &str,
        now: u64,
        before_commit: F,
    ) -> io::Result<u64>
    where
        F: FnOnce(u64) -> io::Result<()>,
    {
        let mut shard = self.get_shard_mut(content_id).await;

        let next = shard.data
            .get(&content_id)
            .map(|counter| counter.peek_increment(replica_id))
            .unwrap_or(1);
        before_commit(next)?;

        let counter = shard.data.entry(content_id).or_default();
        Ok(counter.increment(replica_id, now))
    }

    /// Raise a row to `candidate` if that is larger than the stored count,
    /// creating the row if absent. Returns true if the row changed.
    pub async fn set_if_greater<F>(
        &self,
        content_id: ContentId,
        replica_id: &str,
        candidate: u64,
        now: u64,
        before_commit: F,
    ) -> io::Result<bool>
    where
        F: FnOnce() -> io::Result<()>,
    {
        let mut shard = self.get_shard_mut(content_id).await;

        let applies = match shard.data.get(&content_id).and_then(|c| c.entry(replica_id)) {
            Some(existing) => candidate > existing.count,
            None => true,
        };
        if !applies {
            return Ok(false);
        }
        before_commit()?;

        let counter = shard.data.entry(content_id).or_default();
        Ok(counter.merge_entry(replica_id, candidate, now))
    }

    // ==================== Aggregate Operations ====================

    /// Sum of all partitions of a content id (0 if unknown)
    pub async fn sum(&self, content_id: ContentId) -> u64 {
        let shard = self.get_shard(content_id).await;
        shard.data.get(&content_id).map(|c| c.value()).unwrap_or(0)
    }

    pub async fn rows_for_content(&self, content_id: ContentId) -> Vec<ViewCounter> {
        let shard = self.get_shard(content_id).await;
        shard.data
            .get(&content_id)
            .map(|counter| {
                counter.entries()
                    .into_iter()
                    .map(|(replica_id, entry)| ViewCounter::new(content_id, &replica_id, entry))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every row owned by `replica_id`, across all shards, ordered by content id
    pub async fn rows_for_replica(&self, replica_id: &str) -> Vec<ViewCounter> {
        let mut rows = Vec::new();

        for shard in &self.shards {
            let shard = shard.read().await;
            for (content_id, counter) in shard.data.iter() {
                if let Some(entry) = counter.entry(replica_id) {
                    rows.push(ViewCounter::new(*content_id, replica_id, entry));
                }
            }
        }

        rows.sort_by_key(|row| row.content_id);
        rows
    }

    /// Number of content ids with at least one row
    pub async fn content_count(&self) -> usize {
        let mut count = 0;
        for shard in &self.shards {
            count += shard.read().await.data.len();
        }
        count
    }

    /// Number of (content, replica) rows
    pub async fn row_count(&self) -> usize {
        let mut count = 0;
        for shard in &self.shards {
            count += shard.read().await.data.values().map(|c| c.partition_count()).sum::<usize>();
        }
        count
    }

    /// Get a snapshot of all rows for WAL compaction
    pub async fn snapshot(&self) -> Vec<ViewCounter> {
        let mut snapshot = Vec::new();

        for shard in &self.shards {
            let shard = shard.read().await;
            for (content_id, counter) in shard.data.iter() {
                for (replica_id, entry) in counter.entries() {
                    snapshot.push(ViewCounter::new(*content_id, &replica_id, entry));
                }
            }
        }

        snapshot
    }

    /// Fold a recovered row into the table (used during WAL replay)
    pub async fn import_entry(&self, content_id: ContentId, replica_id: &str, entry: CounterEntry) {
        let mut shard = self.get_shard_mut(content_id).await;
        let counter = shard.data.entry(content_id).or_default();
        counter.merge_entry(replica_id, entry.count, entry.last_updated);
    }
}

impl Default for ShardedStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_log(_: u64) -> io::Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn test_sharded_increment() {
        let storage = ShardedStorage::new();

        assert!(!storage.exists(7, "replica_1").await);
        assert_eq!(storage.increment(7, "replica_1", 10, no_log).await.unwrap(), 1);
        assert_eq!(storage.increment(7, "replica_1", 11, no_log).await.unwrap(), 2);
        assert!(storage.exists(7, "replica_1").await);

        let entry = storage.get(7, "replica_1").await.unwrap();
        assert_eq!(entry, CounterEntry { count: 2, last_updated: 11 });
        assert_eq!(storage.sum(7).await, 2);
        assert_eq!(storage.sum(8).await, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_row_untouched() {
        let storage = ShardedStorage::new();
        storage.increment(1, "a", 1, no_log).await.unwrap();

        let result = storage
            .increment(1, "a", 2, |_| Err(io::Error::new(io::ErrorKind::Other, "disk full")))
            .await;
        assert!(result.is_err());
        assert_eq!(storage.get(1, "a").await.unwrap().count, 1);

        let result = storage
            .increment(2, "a", 2, |_| Err(io::Error::new(io::ErrorKind::Other, "disk full")))
            .await;
        assert!(result.is_err());
        assert!(!storage.exists(2, "a").await);
        assert_eq!(storage.content_count().await, 1);
    }

    #[tokio::test]
    async fn test_set_if_greater() {
        let storage = ShardedStorage::new();

        assert!(storage.set_if_greater(7, "b", 5, 1, || Ok(())).await.unwrap());
        assert!(!storage.set_if_greater(7, "b", 3, 2, || Ok(())).await.unwrap());
        assert!(!storage.set_if_greater(7, "b", 5, 3, || Ok(())).await.unwrap());
        assert!(storage.set_if_greater(7, "b", 6, 4, || Ok(())).await.unwrap());

        assert_eq!(storage.get(7, "b").await.unwrap(), CounterEntry { count: 6, last_updated: 4 });
    }

    #[tokio::test]
    async fn test_rows_for_replica_spans_shards() {
        let storage = ShardedStorage::with_shard_count(4);

        for content_id in 0..20u64 {
            storage.increment(content_id, "a", 1, no_log).await.unwrap();
        }
        storage.set_if_greater(3, "b", 9, 1, || Ok(())).await.unwrap();

        let rows = storage.rows_for_replica("a").await;
        assert_eq!(rows.len(), 20);
        assert_eq!(rows.first().unwrap().content_id, 0);
        assert_eq!(rows.last().unwrap().content_id, 19);

        assert_eq!(storage.rows_for_replica("b").await.len(), 1);
        assert_eq!(storage.rows_for_content(3).await.len(), 2);
        assert_eq!(storage.snapshot().await.len(), 21);
        assert_eq!(storage.row_count().await, 21);
    }

    #[tokio::test]
    async fn test_shard_count_rounds_up() {
        assert_eq!(ShardedStorage::with_shard_count(5).shard_count(), 8);
        assert_eq!(ShardedStorage::with_shard_count(0).shard_count(), 1);
    }
}
