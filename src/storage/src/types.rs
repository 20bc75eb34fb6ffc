use serde::{Deserialize, Serialize};

/// Identifier of a piece of content (a video).
pub type ContentId = u64;

/// Get current timestamp in milliseconds
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One replica's partition of a counter.
///
/// `last_updated` is advisory (diagnostics only) and never takes part in
/// conflict resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterEntry {
    pub count: u64,
    /// Unix ms
    pub last_updated: u64,
}

/// A single (content, replica) row as exposed to readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewCounter {
    pub content_id: ContentId,
    pub replica_id: String,
    pub count: u64,
    pub last_updated_at: u64,
}

impl ViewCounter {
    pub fn new(content_id: ContentId, replica_id: &str, entry: CounterEntry) -> Self {
        ViewCounter {
            content_id,
            replica_id: replica_id.to_string(),
            count: entry.count,
            last_updated_at: entry.last_updated,
        }
    }
}

/// Sum of row counts, saturating at `u64::MAX`
pub fn total_views(rows: &[ViewCounter]) -> u64 {
    rows.iter().fold(0u64, |total, row| total.saturating_add(row.count))
}
