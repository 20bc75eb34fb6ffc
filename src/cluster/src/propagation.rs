use std::sync::Arc;
use std::time::Duration;
use log::{debug, error, info, warn};
use storage::{ContentId, CounterStore, StorageResult};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::registry::ReplicaRegistry;
use crate::transport::PeerTransport;
use crate::types::{Peer, PropagationSnapshot, PropagationStats, SyncMessage};

/// Consecutive failed sends after which a sweep stops offering rows to a peer
const MAX_SWEEP_FAILURES: usize = 3;

#[derive(Debug, Default)]
struct SweepOutcome {
    delivered: usize,
    failed: usize,
    abandoned: bool,
}

async fn sweep_peer(transport: &dyn PeerTransport, peer: &Peer, messages: &[SyncMessage]) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();
    let mut consecutive = 0;

    for message in messages {
        match transport.send_sync(peer, message).await {
            Ok(()) => {
                outcome.delivered += 1;
                consecutive = 0;
            }
            Err(e) => {
                debug!("Sweep send of content {} to {} failed: {}", message.content_id, peer, e);
                outcome.failed += 1;
                consecutive += 1;
                if consecutive >= MAX_SWEEP_FAILURES {
                    outcome.abandoned = true;
                    break;
                }
            }
        }
    }
    outcome
}

/// Pushes this replica's partitions to its peers.
///
/// Every send is a single attempt. A failed send is logged, counted and
/// dropped; the next threshold push or sweep carries a newer value anyway.
pub struct PropagationController {
    registry: ReplicaRegistry,
    store: Arc<dyn CounterStore>,
    transport: Arc<dyn PeerTransport>,
    stats: PropagationStats,
}

impl PropagationController {
    pub fn new(
        registry: ReplicaRegistry,
        store: Arc<dyn CounterStore>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        PropagationController {
            registry,
            store,
            transport,
            stats: PropagationStats::default(),
        }
    }

    pub fn registry(&self) -> &ReplicaRegistry {
        &self.registry
    }

    pub fn stats(&self) -> PropagationSnapshot {
        self.stats.snapshot()
    }

    /// Send the local partition for `content_id` to every peer.
    ///
    /// Returns how many peers accepted it. Nothing is sent when this replica
    /// has no row for the content.
    pub async fn broadcast(&self, content_id: ContentId) -> usize {
        let peers = self.registry.peers();
        if peers.is_empty() {
            return 0;
        }

        let row = match self.store.get(content_id, self.registry.local_id()).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                debug!("No local counter for content {}, nothing to broadcast", content_id);
                return 0;
            }
            Err(e) => {
                error!("Failed to read local counter for content {}: {}", content_id, e);
                return 0;
            }
        };

        let message = Arc::new(SyncMessage::new(self.registry.local_id(), content_id, row.count));
        let mut sends = JoinSet::new();
        for peer in peers.iter().cloned() {
            let transport = self.transport.clone();
            let message = message.clone();
            sends.spawn(async move {
                let result = transport.send_sync(&peer, &message).await;
                (peer, result)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    self.stats.record_sync(true);
                    delivered += 1;
                    debug!("Synced content {} (count {}) to {}", content_id, message.count, peer);
                }
                Ok((peer, Err(e))) => {
                    self.stats.record_sync(false);
                    warn!("Failed to sync content {} to {}: {}", content_id, peer, e);
                }
                Err(e) => {
                    self.stats.record_sync(false);
                    warn!("Sync task for content {} aborted: {}", content_id, e);
                }
            }
        }
        delivered
    }

    /// Detached [`broadcast`](Self::broadcast) for the write path
    pub fn spawn_broadcast(self: &Arc<Self>, content_id: ContentId) -> JoinHandle<usize> {
        let controller = self.clone();
        tokio::spawn(async move { controller.broadcast(content_id).await })
    }

    /// Offer every local partition to every peer.
    ///
    /// Each peer gets its own task that walks the rows in order, so a slow or
    /// dead peer only delays itself. A peer that fails
    /// `MAX_SWEEP_FAILURES` sends in a row is skipped until the next sweep.
    ///
    /// Returns the number of content ids swept.
    pub async fn periodic_sync(&self) -> StorageResult<usize> {
        let rows = self.store.rows_for_replica_id(self.registry.local_id()).await?;
        self.stats.record_sweep();
        if self.registry.peers().is_empty() || rows.is_empty() {
            return Ok(rows.len());
        }

        let local_id = self.registry.local_id();
        let messages: Arc<Vec<SyncMessage>> = Arc::new(
            rows.iter()
                .map(|row| SyncMessage::new(local_id, row.content_id, row.count))
                .collect(),
        );

        let mut peers = JoinSet::new();
        for peer in self.registry.peers().iter().cloned() {
            let transport = self.transport.clone();
            let messages = messages.clone();
            peers.spawn(async move {
                let outcome = sweep_peer(transport.as_ref(), &peer, &messages).await;
                (peer, outcome)
            });
        }

        while let Some(joined) = peers.join_next().await {
            match joined {
                Ok((peer, outcome)) => {
                    for _ in 0..outcome.delivered {
                        self.stats.record_sync(true);
                    }
                    for _ in 0..outcome.failed {
                        self.stats.record_sync(false);
                    }
                    if outcome.abandoned {
                        warn!(
                            "Skipping {} for the rest of this sweep after {} failed sends ({} of {} delivered)",
                            peer, outcome.failed, outcome.delivered, messages.len()
                        );
                    }
                }
                Err(e) => warn!("Sweep task aborted: {}", e),
            }
        }
        debug!("Anti-entropy sweep pushed {} content ids", rows.len());
        Ok(rows.len())
    }

    /// Ask every peer to broadcast its partition for `content_id`, then
    /// broadcast ours.
    ///
    /// Waits for the triggers to be accepted, not for the peers' pushes to
    /// land here.
    pub async fn hard_sync(&self, content_id: ContentId) {
        let mut triggers = JoinSet::new();
        for peer in self.registry.peers().iter().cloned() {
            let transport = self.transport.clone();
            triggers.spawn(async move {
                let result = transport.send_force_sync(&peer, content_id).await;
                (peer, result)
            });
        }

        while let Some(joined) = triggers.join_next().await {
            match joined {
                Ok((_, Ok(()))) => self.stats.record_force_sync(true),
                Ok((peer, Err(e))) => {
                    self.stats.record_force_sync(false);
                    warn!("Failed to trigger force-sync of content {} on {}: {}", content_id, peer, e);
                }
                Err(e) => {
                    self.stats.record_force_sync(false);
                    warn!("Force-sync task for content {} aborted: {}", content_id, e);
                }
            }
        }

        self.broadcast(content_id).await;
    }

    /// Run [`periodic_sync`](Self::periodic_sync) every `period` until shutdown.
    ///
    /// The first sweep happens one full period after start.
    pub fn start_sweep(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Anti-entropy sweep every {:?} to {} peers", period, self.registry.peer_count());

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.periodic_sync().await {
                            error!("Anti-entropy sweep failed: {}", e);
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Stopping anti-entropy sweep");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::MergeEngine;
    use crate::transport::loopback::LoopbackTransport;
    use storage::Storage;

    struct Node {
        store: Arc<Storage>,
        controller: Arc<PropagationController>,
    }

    fn cluster(urls: &[&str]) -> (Arc<LoopbackTransport>, Vec<Node>) {
        let transport = Arc::new(LoopbackTransport::default());
        let mut nodes = Vec::new();
        for (i, url) in urls.iter().enumerate() {
            let replica_id = format!("replica_{}", i + 1);
            let store = Arc::new(Storage::new());
            let registry = ReplicaRegistry::new(&replica_id, urls, Some(*url));
            let controller = Arc::new(PropagationController::new(registry, store.clone(), transport.clone()));
            transport.register(url, MergeEngine::new(store.clone(), &replica_id), controller.clone());
            nodes.push(Node { store, controller });
        }
        (transport, nodes)
    }

    #[tokio::test]
    async fn test_broadcast_without_local_row_sends_nothing() {
        let (transport, nodes) = cluster(&["http://a", "http://b"]);

        assert_eq!(nodes[0].controller.broadcast(3).await, 0);
        assert!(transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let (transport, nodes) = cluster(&["http://a", "http://b", "http://c"]);
        nodes[0].store.atomic_increment(4, "replica_1", 1).await.unwrap();
        nodes[0].store.atomic_increment(4, "replica_1", 2).await.unwrap();

        assert_eq!(nodes[0].controller.broadcast(4).await, 2);
        for node in &nodes[1..] {
            assert_eq!(node.store.get(4, "replica_1").await.unwrap().unwrap().count, 2);
        }
        assert_eq!(transport.delivered().len(), 2);
        assert_eq!(nodes[0].controller.stats().syncs_sent, 2);
    }

    #[tokio::test]
    async fn test_unreachable_peer_does_not_block_others() {
        let (transport, nodes) = cluster(&["http://a", "http://b", "http://c"]);
        transport.set_down("http://b", true);
        nodes[0].store.atomic_increment(4, "replica_1", 1).await.unwrap();

        assert_eq!(nodes[0].controller.broadcast(4).await, 1);
        assert!(!nodes[1].store.exists(4, "replica_1").await.unwrap());
        assert!(nodes[2].store.exists(4, "replica_1").await.unwrap());
        assert_eq!(nodes[0].store.sum_by_content_id(4).await.unwrap(), 1);

        let stats = nodes[0].controller.stats();
        assert_eq!(stats.syncs_sent, 1);
        assert_eq!(stats.sync_failures, 1);
    }

    #[tokio::test]
    async fn test_periodic_sync_converges() {
        let (transport, nodes) = cluster(&["http://a", "http://b"]);
        for id in [1u64, 2, 3] {
            nodes[0].store.atomic_increment(id, "replica_1", 1).await.unwrap();
        }
        nodes[1].store.atomic_increment(2, "replica_2", 1).await.unwrap();

        // b missed everything while it was down
        transport.set_down("http://b", true);
        assert_eq!(nodes[0].controller.periodic_sync().await.unwrap(), 3);
        assert_eq!(nodes[1].store.sum_by_content_id(1).await.unwrap(), 0);

        transport.set_down("http://b", false);
        nodes[0].controller.periodic_sync().await.unwrap();
        nodes[1].controller.periodic_sync().await.unwrap();

        for id in [1u64, 2, 3] {
            let a = nodes[0].store.sum_by_content_id(id).await.unwrap();
            let b = nodes[1].store.sum_by_content_id(id).await.unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(nodes[0].store.sum_by_content_id(2).await.unwrap(), 2);
        assert_eq!(nodes[0].controller.stats().sweeps, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_peer_does_not_hold_up_sweep() {
        let (transport, nodes) = cluster(&["http://a", "http://b", "http://c"]);
        transport.set_stalled("http://b", Some(Duration::from_secs(2)));
        for id in 0..10u64 {
            nodes[0].store.atomic_increment(id, "replica_1", 1).await.unwrap();
        }

        let start = tokio::time::Instant::now();
        let sweep = {
            let controller = nodes[0].controller.clone();
            tokio::spawn(async move { controller.periodic_sync().await })
        };

        // c has every row before b's first send has even timed out
        tokio::time::sleep(Duration::from_millis(100)).await;
        for id in 0..10u64 {
            assert!(nodes[2].store.exists(id, "replica_1").await.unwrap());
        }
        assert!(!nodes[1].store.exists(0, "replica_1").await.unwrap());

        assert_eq!(sweep.await.unwrap().unwrap(), 10);
        assert!(start.elapsed() < Duration::from_secs(7));

        let stats = nodes[0].controller.stats();
        assert_eq!(stats.syncs_sent, 10);
        assert_eq!(stats.sync_failures, MAX_SWEEP_FAILURES as u64);
    }

    #[tokio::test]
    async fn test_hard_sync_pulls_peer_partitions() {
        let (_transport, nodes) = cluster(&["http://a", "http://b", "http://c"]);
        nodes[1].store.atomic_increment(8, "replica_2", 1).await.unwrap();
        nodes[2].store.atomic_increment(8, "replica_3", 1).await.unwrap();
        nodes[2].store.atomic_increment(8, "replica_3", 2).await.unwrap();

        nodes[0].controller.hard_sync(8).await;

        assert_eq!(nodes[0].store.sum_by_content_id(8).await.unwrap(), 3);
        assert_eq!(nodes[0].controller.stats().force_syncs_sent, 2);
    }

    #[tokio::test]
    async fn test_hard_sync_survives_down_peer() {
        let (transport, nodes) = cluster(&["http://a", "http://b"]);
        transport.set_down("http://b", true);
        nodes[0].store.atomic_increment(8, "replica_1", 1).await.unwrap();

        nodes[0].controller.hard_sync(8).await;

        assert_eq!(nodes[0].store.sum_by_content_id(8).await.unwrap(), 1);
        let stats = nodes[0].controller.stats();
        assert_eq!(stats.force_sync_failures, 1);
        assert_eq!(stats.sync_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_runs_until_shutdown() {
        let (_transport, nodes) = cluster(&["http://a", "http://b"]);
        nodes[0].store.atomic_increment(5, "replica_1", 1).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = nodes[0].controller.clone().start_sweep(Duration::from_secs(120), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!nodes[1].store.exists(5, "replica_1").await.unwrap());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(nodes[1].store.exists(5, "replica_1").await.unwrap());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(nodes[0].controller.stats().sweeps, 1);
    }
}
