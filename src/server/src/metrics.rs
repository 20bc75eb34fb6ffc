use std::sync::atomic::{AtomicUsize, Ordering};
use cluster::CounterManager;
use storage::CounterStore;

/// Replica metrics
pub struct Metrics {
    pub total_requests: AtomicUsize,
    pub views_recorded: AtomicUsize,
    pub view_failures: AtomicUsize,
    pub syncs_received: AtomicUsize,
    pub merges_applied: AtomicUsize,
    pub syncs_rejected: AtomicUsize,
    pub force_syncs_received: AtomicUsize,
    pub reads: AtomicUsize,
    pub start_time: std::time::Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            total_requests: AtomicUsize::new(0),
            views_recorded: AtomicUsize::new(0),
            view_failures: AtomicUsize::new(0),
            syncs_received: AtomicUsize::new(0),
            merges_applied: AtomicUsize::new(0),
            syncs_rejected: AtomicUsize::new(0),
            force_syncs_received: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Generate Prometheus-format metrics
    pub async fn to_prometheus(&self, store: &dyn CounterStore, manager: &CounterManager) -> String {
        let uptime_secs = self.start_time.elapsed().as_secs();
        let content_count = store.content_count().await.unwrap_or(0);
        let propagation = manager.controller().stats();

        let mut output = String::new();

        output.push_str("# HELP tally_http_requests_total Total number of HTTP requests handled\n");
        output.push_str("# TYPE tally_http_requests_total counter\n");
        output.push_str(&format!("tally_http_requests_total {}\n", self.total_requests.load(Ordering::Relaxed)));

        // Local write path
        output.push_str("# HELP tally_views_recorded_total Views counted on this replica\n");
        output.push_str("# TYPE tally_views_recorded_total counter\n");
        output.push_str(&format!("tally_views_recorded_total {}\n", self.views_recorded.load(Ordering::Relaxed)));

        output.push_str("# HELP tally_view_failures_total Views that failed to reach storage\n");
        output.push_str("# TYPE tally_view_failures_total counter\n");
        output.push_str(&format!("tally_view_failures_total {}\n", self.view_failures.load(Ordering::Relaxed)));

        output.push_str("# HELP tally_reads_total Count reads served\n");
        output.push_str("# TYPE tally_reads_total counter\n");
        output.push_str(&format!("tally_reads_total {}\n", self.reads.load(Ordering::Relaxed)));

        // Inbound replication
        output.push_str("# HELP tally_syncs_received_total Sync messages received from peers\n");
        output.push_str("# TYPE tally_syncs_received_total counter\n");
        output.push_str(&format!("tally_syncs_received_total {}\n", self.syncs_received.load(Ordering::Relaxed)));

        output.push_str("# HELP tally_merges_applied_total Sync messages that raised a stored partition\n");
        output.push_str("# TYPE tally_merges_applied_total counter\n");
        output.push_str(&format!("tally_merges_applied_total {}\n", self.merges_applied.load(Ordering::Relaxed)));

        output.push_str("# HELP tally_syncs_rejected_total Malformed sync messages rejected\n");
        output.push_str("# TYPE tally_syncs_rejected_total counter\n");
        output.push_str(&format!("tally_syncs_rejected_total {}\n", self.syncs_rejected.load(Ordering::Relaxed)));

        output.push_str("# HELP tally_force_syncs_received_total Force-sync triggers received from peers\n");
        output.push_str("# TYPE tally_force_syncs_received_total counter\n");
        output.push_str(&format!("tally_force_syncs_received_total {}\n", self.force_syncs_received.load(Ordering::Relaxed)));

        // Outbound replication
        output.push_str("\n# Propagation Metrics\n");

        output.push_str("# HELP tally_syncs_sent_total Sync messages accepted by peers\n");
        output.push_str("# TYPE tally_syncs_sent_total counter\n");
        output.push_str(&format!("tally_syncs_sent_total {}\n", propagation.syncs_sent));

        output.push_str("# HELP tally_sync_failures_total Sync messages dropped after a failed send\n");
        output.push_str("# TYPE tally_sync_failures_total counter\n");
        output.push_str(&format!("tally_sync_failures_total {}\n", propagation.sync_failures));

        output.push_str("# HELP tally_force_syncs_sent_total Force-sync triggers accepted by peers\n");
        output.push_str("# TYPE tally_force_syncs_sent_total counter\n");
        output.push_str(&format!("tally_force_syncs_sent_total {}\n", propagation.force_syncs_sent));

        output.push_str("# HELP tally_force_sync_failures_total Force-sync triggers that failed\n");
        output.push_str("# TYPE tally_force_sync_failures_total counter\n");
        output.push_str(&format!("tally_force_sync_failures_total {}\n", propagation.force_sync_failures));

        output.push_str("# HELP tally_sweeps_total Anti-entropy sweeps run\n");
        output.push_str("# TYPE tally_sweeps_total counter\n");
        output.push_str(&format!("tally_sweeps_total {}\n", propagation.sweeps));

        output.push_str("# HELP tally_peers Configured peer replicas\n");
        output.push_str("# TYPE tally_peers gauge\n");
        output.push_str(&format!("tally_peers {}\n", manager.registry().peer_count()));

        // Storage
        output.push_str("# HELP tally_contents_total Content ids with at least one counter\n");
        output.push_str("# TYPE tally_contents_total gauge\n");
        output.push_str(&format!("tally_contents_total {}\n", content_count));

        output.push_str("# HELP tally_uptime_seconds Replica uptime in seconds\n");
        output.push_str("# TYPE tally_uptime_seconds counter\n");
        output.push_str(&format!("tally_uptime_seconds {}\n", uptime_secs));

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
