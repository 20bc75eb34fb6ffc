use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use storage::{ContentId, ViewCounter};

use crate::error::SyncMessageError;

/// Longest accepted replica identifier, in bytes
pub const MAX_REPLICA_ID_LEN: usize = 50;

pub const SYNC_ACTION: &str = "View Count Sync";

/// A peer replica, addressed by its HTTP base URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    base_url: String,
}

impl Peer {
    pub fn new(base_url: &str) -> Self {
        Peer {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn sync_url(&self) -> String {
        format!("{}/api/crdt/sync", self.base_url)
    }

    pub fn force_sync_url(&self, content_id: ContentId) -> String {
        format!("{}/api/crdt/force-sync/{}", self.base_url, content_id)
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base_url)
    }
}

/// A replica's report of its own partition for one content id.
///
/// Serialized as `{"action","timestamp","sourceReplicaId","videoId","count"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub action: &'static str,
    /// Unix ms at the sender, advisory only
    pub timestamp: u64,
    pub source_replica_id: String,
    #[serde(rename = "videoId")]
    pub content_id: ContentId,
    pub count: u64,
}

impl SyncMessage {
    pub fn new(source_replica_id: &str, content_id: ContentId, count: u64) -> Self {
        SyncMessage {
            action: SYNC_ACTION,
            timestamp: storage::current_timestamp_ms(),
            source_replica_id: source_replica_id.to_string(),
            content_id,
            count,
        }
    }
}

/// Inbound sync body before validation.
///
/// Fields are optional and signed so that missing or negative values are
/// reported as validation errors instead of opaque decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub source_replica_id: Option<String>,
    pub video_id: Option<i64>,
    pub count: Option<i64>,
}

impl SyncPayload {
    pub fn validate(self) -> Result<SyncMessage, SyncMessageError> {
        let source_replica_id = self.source_replica_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(SyncMessageError::MissingReplicaId)?;
        if source_replica_id.len() > MAX_REPLICA_ID_LEN {
            return Err(SyncMessageError::ReplicaIdTooLong(source_replica_id.len()));
        }

        let video_id = self.video_id.ok_or(SyncMessageError::MissingContentId)?;
        if video_id < 0 {
            return Err(SyncMessageError::NegativeContentId(video_id));
        }

        let count = self.count.ok_or(SyncMessageError::MissingCount)?;
        if count < 0 {
            return Err(SyncMessageError::NegativeCount(count));
        }

        Ok(SyncMessage::new(&source_replica_id, video_id as ContentId, count as u64))
    }
}

/// Detailed per-content read: total plus each replica's partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStatistics {
    pub content_id: ContentId,
    pub total: u64,
    pub counters: Vec<ViewCounter>,
}

/// Outbound propagation counters
#[derive(Debug, Default)]
pub struct PropagationStats {
    syncs_sent: AtomicU64,
    sync_failures: AtomicU64,
    force_syncs_sent: AtomicU64,
    force_sync_failures: AtomicU64,
    sweeps: AtomicU64,
}

/// Point-in-time copy of [`PropagationStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationSnapshot {
    pub syncs_sent: u64,
    pub sync_failures: u64,
    pub force_syncs_sent: u64,
    pub force_sync_failures: u64,
    pub sweeps: u64,
}

impl PropagationStats {
    pub fn record_sync(&self, ok: bool) {
        if ok {
            self.syncs_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sync_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_force_sync(&self, ok: bool) {
        if ok {
            self.force_syncs_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.force_sync_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PropagationSnapshot {
        PropagationSnapshot {
            syncs_sent: self.syncs_sent.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            force_syncs_sent: self.force_syncs_sent.load(Ordering::Relaxed),
            force_sync_failures: self.force_sync_failures.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}
