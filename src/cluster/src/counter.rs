use std::sync::Arc;
use log::debug;
use storage::{ContentId, CounterStore, StorageResult, ViewCounter};

use crate::merge::MergeEngine;
use crate::policy::PushPolicy;
use crate::propagation::PropagationController;
use crate::registry::ReplicaRegistry;
use crate::transport::PeerTransport;
use crate::types::ViewStatistics;

/// Local entry point for view counting on one replica.
///
/// Views only ever touch this replica's own partition. Whether an increment
/// is pushed to peers is decided from the count the store returned for that
/// increment, so no extra read is needed and the push never delays the caller.
pub struct CounterManager {
    store: Arc<dyn CounterStore>,
    policy: PushPolicy,
    controller: Arc<PropagationController>,
    merge: MergeEngine,
}

impl CounterManager {
    pub fn new(
        registry: ReplicaRegistry,
        store: Arc<dyn CounterStore>,
        transport: Arc<dyn PeerTransport>,
        policy: PushPolicy,
    ) -> Self {
        let merge = MergeEngine::new(store.clone(), registry.local_id());
        let controller = Arc::new(PropagationController::new(registry, store.clone(), transport));
        CounterManager {
            store,
            policy,
            controller,
            merge,
        }
    }

    pub fn local_replica_id(&self) -> &str {
        self.controller.registry().local_id()
    }

    pub fn registry(&self) -> &ReplicaRegistry {
        self.controller.registry()
    }

    pub fn controller(&self) -> &Arc<PropagationController> {
        &self.controller
    }

    pub fn merge_engine(&self) -> &MergeEngine {
        &self.merge
    }

    /// Count one view on the local partition and return its new value
    pub async fn record_view(&self, content_id: ContentId) -> StorageResult<u64> {
        let now = storage::current_timestamp_ms();
        let count = self.store
            .atomic_increment(content_id, self.local_replica_id(), now)
            .await?;

        if self.policy.should_push(count) {
            debug!("Content {} reached {} local views, pushing to peers", content_id, count);
            self.controller.spawn_broadcast(content_id);
        }
        Ok(count)
    }

    /// Sum of all known partitions (0 for unknown content)
    pub async fn get_total(&self, content_id: ContentId) -> StorageResult<u64> {
        self.store.sum_by_content_id(content_id).await
    }

    pub async fn get_all_counters(&self, content_id: ContentId) -> StorageResult<Vec<ViewCounter>> {
        self.store.rows_for_content_id(content_id).await
    }

    /// Apply a peer's reported partition
    pub async fn merge(&self, content_id: ContentId, source_replica_id: &str, count: u64) -> StorageResult<bool> {
        self.merge.merge(content_id, source_replica_id, count).await
    }

    /// Reconcile with every reachable peer, then read total and partitions
    pub async fn view_statistics(&self, content_id: ContentId) -> StorageResult<ViewStatistics> {
        self.controller.hard_sync(content_id).await;

        let counters = self.get_all_counters(content_id).await?;
        let total = storage::total_views(&counters);
        Ok(ViewStatistics {
            content_id,
            total,
            counters,
        })
    }
}
