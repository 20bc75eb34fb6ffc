use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use log::{error, info};
use tokio::sync::RwLock;

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::sharded::ShardedStorage;
use crate::store::CounterStore;
use crate::types::{ContentId, CounterEntry, ViewCounter};
use crate::wal::{Wal, WalEntry};

/// Counter store for one replica.
///
/// Rows live in a [`ShardedStorage`]. When a WAL path is configured every
/// mutation is appended to the log while the row's shard lock is held and
/// before the in-memory value changes, so a failed append leaves the row
/// untouched and surfaces as an error.
///
/// Cloning is cheap; clones share the same table and log.
#[derive(Clone)]
pub struct Storage {
    sharded: Arc<ShardedStorage>,
    wal: Arc<Mutex<Wal>>,
    /// Writers hold this shared; compaction holds it exclusively so that no
    /// append can fall between the snapshot and the log rewrite.
    compaction_gate: Arc<RwLock<()>>,
    /// Appends since the log last held exactly one entry per row
    appended: Arc<AtomicUsize>,
    compacting: Arc<AtomicBool>,
    compaction_threshold: usize,
}

impl Storage {
    /// Create a new in-memory storage (no persistence).
    pub fn new() -> Self {
        info!("Initializing in-memory counter storage");
        Self::from_parts(ShardedStorage::new(), Wal::disabled(), 0)
    }

    fn from_parts(sharded: ShardedStorage, wal: Wal, compaction_threshold: usize) -> Self {
        Storage {
            sharded: Arc::new(sharded),
            wal: Arc::new(Mutex::new(wal)),
            compaction_gate: Arc::new(RwLock::new(())),
            appended: Arc::new(AtomicUsize::new(0)),
            compacting: Arc::new(AtomicBool::new(false)),
            compaction_threshold,
        }
    }

    /// Open storage with configuration, replaying the WAL if one is configured.
    pub async fn open(config: StorageConfig) -> StorageResult<Self> {
        let sharded = ShardedStorage::with_shard_count(config.shard_count);

        let wal = match &config.wal_path {
            Some(path) => Wal::new(path)?,
            None => {
                info!("Running in memory-only mode (no persistence)");
                Wal::disabled()
            }
        };

        let entries = wal.read_entries()?;
        let replayed = entries.len();
        for entry in entries {
            match entry {
                WalEntry::Put { content_id, replica_id, count, last_updated } => {
                    sharded
                        .import_entry(content_id, &replica_id, CounterEntry { count, last_updated })
                        .await;
                }
            }
        }
        if replayed > 0 {
            info!("Recovered {} WAL entries ({} content ids)", replayed, sharded.content_count().await);
        }

        // entries beyond one per row are superseded history
        let redundant = replayed.saturating_sub(sharded.row_count().await);
        let storage = Self::from_parts(sharded, wal, config.compaction_threshold);
        storage.appended.store(redundant, Ordering::SeqCst);
        Ok(storage)
    }

    pub fn is_persistent(&self) -> bool {
        self.wal.lock().map(|wal| wal.is_enabled()).unwrap_or(false)
    }

    fn log_put(&self, content_id: ContentId, replica_id: &str, count: u64, now: u64) -> std::io::Result<()> {
        let mut wal = self.wal.lock().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, StorageError::WalPoisoned.to_string())
        })?;
        wal.log_put(content_id, replica_id, count, now)
    }

    fn after_append(&self) {
        if self.compaction_threshold == 0 {
            return;
        }
        let appended = self.appended.fetch_add(1, Ordering::SeqCst) + 1;
        if appended < self.compaction_threshold {
            return;
        }
        if self.compacting.swap(true, Ordering::SeqCst) {
            return;
        }

        let storage = self.clone();
        tokio::spawn(async move {
            if let Err(e) = storage.compact().await {
                error!("WAL compaction failed: {}", e);
            }
            storage.compacting.store(false, Ordering::SeqCst);
        });
    }

    /// Rewrite the WAL as one entry per current row.
    pub async fn compact(&self) -> StorageResult<()> {
        let _gate = self.compaction_gate.write().await;
        let snapshot = self.sharded.snapshot().await;

        let mut wal = self.wal.lock().map_err(|_| StorageError::WalPoisoned)?;
        wal.compact(&snapshot)?;
        self.appended.store(0, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for Storage {
    async fn exists(&self, content_id: ContentId, replica_id: &str) -> StorageResult<bool> {
        Ok(self.sharded.exists(content_id, replica_id).await)
    }

    async fn get(&self, content_id: ContentId, replica_id: &str) -> StorageResult<Option<ViewCounter>> {
        Ok(self.sharded
            .get(content_id, replica_id)
            .await
            .map(|entry| ViewCounter::new(content_id, replica_id, entry)))
    }

    async fn atomic_increment(&self, content_id: ContentId, replica_id: &str, now: u64) -> StorageResult<u64> {
        let count = {
            let _gate = self.compaction_gate.read().await;
            self.sharded
                .increment(content_id, replica_id, now, |next| self.log_put(content_id, replica_id, next, now))
                .await?
        };
        self.after_append();
        Ok(count)
    }

    async fn set_if_greater(
        &self,
        content_id: ContentId,
        replica_id: &str,
        candidate: u64,
        now: u64,
    ) -> StorageResult<bool> {
        let changed = {
            let _gate = self.compaction_gate.read().await;
            self.sharded
                .set_if_greater(content_id, replica_id, candidate, now, || {
                    self.log_put(content_id, replica_id, candidate, now)
                })
                .await?
        };
        if changed {
            self.after_append();
        }
        Ok(changed)
    }

    async fn sum_by_content_id(&self, content_id: ContentId) -> StorageResult<u64> {
        Ok(self.sharded.sum(content_id).await)
    }

    async fn rows_for_content_id(&self, content_id: ContentId) -> StorageResult<Vec<ViewCounter>> {
        Ok(self.sharded.rows_for_content(content_id).await)
    }

    async fn rows_for_replica_id(&self, replica_id: &str) -> StorageResult<Vec<ViewCounter>> {
        Ok(self.sharded.rows_for_replica(replica_id).await)
    }

    async fn content_count(&self) -> StorageResult<usize> {
        Ok(self.sharded.content_count().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store() {
        let storage = Storage::new();
        assert!(!storage.is_persistent());

        assert_eq!(storage.atomic_increment(7, "a", 1).await.unwrap(), 1);
        assert_eq!(storage.atomic_increment(7, "a", 2).await.unwrap(), 2);
        assert!(storage.set_if_greater(7, "b", 4, 3).await.unwrap());

        assert_eq!(storage.sum_by_content_id(7).await.unwrap(), 6);
        assert_eq!(storage.sum_by_content_id(99).await.unwrap(), 0);
        assert!(storage.rows_for_content_id(99).await.unwrap().is_empty());

        let row = storage.get(7, "b").await.unwrap().unwrap();
        assert_eq!(row.count, 4);
        assert_eq!(row.last_updated_at, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let storage = Storage::new();
        let mut handles = Vec::new();

        for _ in 0..64 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    storage.atomic_increment(1, "a", 0).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(storage.sum_by_content_id(1).await.unwrap(), 64 * 50);
    }

    #[tokio::test]
    async fn test_wal_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica_1.wal");

        {
            let storage = Storage::open(StorageConfig::with_wal(&path)).await.unwrap();
            assert!(storage.is_persistent());
            for _ in 0..3 {
                storage.atomic_increment(7, "replica_1", 10).await.unwrap();
            }
            storage.set_if_greater(7, "replica_2", 5, 11).await.unwrap();
            storage.set_if_greater(7, "replica_2", 2, 12).await.unwrap();
        }

        let storage = Storage::open(StorageConfig::with_wal(&path)).await.unwrap();
        assert_eq!(storage.get(7, "replica_1").await.unwrap().unwrap().count, 3);
        assert_eq!(storage.get(7, "replica_2").await.unwrap().unwrap().count, 5);
        assert_eq!(storage.sum_by_content_id(7).await.unwrap(), 8);

        // Increments continue from the recovered value
        assert_eq!(storage.atomic_increment(7, "replica_1", 13).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_compaction_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica_1.wal");
        let config = StorageConfig::with_wal(&path).with_compaction_threshold(1_000_000);

        {
            let storage = Storage::open(config.clone()).await.unwrap();
            for content_id in 0..5u64 {
                for _ in 0..10 {
                    storage.atomic_increment(content_id, "replica_1", 1).await.unwrap();
                }
            }
            storage.compact().await.unwrap();

            let wal = Wal::new(&path).unwrap();
            assert_eq!(wal.read_entries().unwrap().len(), 5);
        }

        let storage = Storage::open(config).await.unwrap();
        for content_id in 0..5u64 {
            assert_eq!(storage.sum_by_content_id(content_id).await.unwrap(), 10);
        }
    }

    #[tokio::test]
    async fn test_compaction_counts_only_new_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica_1.wal");

        {
            let storage = Storage::open(StorageConfig::with_wal(&path).with_compaction_threshold(1_000_000))
                .await
                .unwrap();
            for content_id in 0..10u64 {
                storage.atomic_increment(content_id, "replica_1", 1).await.unwrap();
            }
        }

        // more rows than the threshold must not make every append rewrite the log
        let storage = Storage::open(StorageConfig::with_wal(&path).with_compaction_threshold(5))
            .await
            .unwrap();
        storage.compact().await.unwrap();
        storage.atomic_increment(0, "replica_1", 2).await.unwrap();
        assert_eq!(Wal::new(&path).unwrap().read_entries().unwrap().len(), 11);

        for _ in 0..3 {
            storage.atomic_increment(1, "replica_1", 3).await.unwrap();
        }
        assert_eq!(Wal::new(&path).unwrap().read_entries().unwrap().len(), 14);

        // the fifth append since compaction triggers one
        storage.atomic_increment(2, "replica_1", 4).await.unwrap();
        let mut entries = 0;
        for _ in 0..200 {
            entries = Wal::new(&path).unwrap().read_entries().unwrap().len();
            if entries == 10 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(entries, 10);
        assert_eq!(storage.sum_by_content_id(1).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_totals_saturate() {
        let storage = Storage::new();
        for replica_id in ["a", "b", "c"] {
            assert!(storage.set_if_greater(1, replica_id, i64::MAX as u64, 1).await.unwrap());
        }
        assert_eq!(storage.sum_by_content_id(1).await.unwrap(), u64::MAX);
    }
}
