//! CRDT (Conflict-free Replicated Data Types) implementations
//!
//! View counts are grow-only: every replica increments only its own
//! partition, partitions merge by taking the maximum, and the total is the sum.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::CounterEntry;

/// G-Counter (Grow-only Counter)
///
/// A CRDT counter that only supports increment operations.
/// Each replica maintains its own count, and the total is the sum of all replicas.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    /// Replica ID -> partition
    counts: HashMap<String, CounterEntry>,
}

impl GCounter {
    pub fn new() -> Self {
        GCounter {
            counts: HashMap::new(),
        }
    }

    /// Increment the partition owned by `replica_id`, returning its new count
    pub fn increment(&mut self, replica_id: &str, now: u64) -> u64 {
        let entry = self.counts.entry(replica_id.to_string()).or_default();
        entry.count += 1;
        entry.last_updated = now;
        entry.count
    }

    /// The value `increment` would produce, without applying it
    pub fn peek_increment(&self, replica_id: &str) -> u64 {
        self.replica_count(replica_id) + 1
    }

    /// Fold a single reported partition value into this counter.
    ///
    /// The stored count only moves up. A missing partition is created even
    /// when the reported count is zero. Returns true if anything changed.
    pub fn merge_entry(&mut self, replica_id: &str, count: u64, now: u64) -> bool {
        match self.counts.get_mut(replica_id) {
            Some(entry) if count > entry.count => {
                entry.count = count;
                entry.last_updated = now;
                true
            }
            Some(_) => false,
            None => {
                self.counts.insert(replica_id.to_string(), CounterEntry { count, last_updated: now });
                true
            }
        }
    }

    /// Merge with another G-Counter (take max of each replica's count)
    pub fn merge(&mut self, other: &GCounter) {
        for (replica_id, entry) in &other.counts {
            self.merge_entry(replica_id, entry.count, entry.last_updated);
        }
    }

    /// Get the total count (sum of all replicas), saturating at `u64::MAX`
    pub fn value(&self) -> u64 {
        self.counts.values().fold(0u64, |total, e| total.saturating_add(e.count))
    }

    /// Get the count for a specific replica
    pub fn replica_count(&self, replica_id: &str) -> u64 {
        self.counts.get(replica_id).map(|e| e.count).unwrap_or(0)
    }

    pub fn entry(&self, replica_id: &str) -> Option<CounterEntry> {
        self.counts.get(replica_id).copied()
    }

    pub fn contains(&self, replica_id: &str) -> bool {
        self.counts.contains_key(replica_id)
    }

    /// Partitions sorted by replica id
    pub fn entries(&self) -> Vec<(String, CounterEntry)> {
        let mut entries: Vec<(String, CounterEntry)> = self.counts
            .iter()
            .map(|(id, entry)| (id.clone(), *entry))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of partitions
    pub fn partition_count(&self) -> usize {
        self.counts.len()
    }
}
