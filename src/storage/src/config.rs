use std::path::Path;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub wal_path: Option<String>,
    /// Number of WAL appends after which the log is rewritten as a snapshot
    /// (0 disables compaction)
    pub compaction_threshold: usize,
    /// Number of lock shards (default: 64, rounded up to a power of 2)
    pub shard_count: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            wal_path: None,
            compaction_threshold: 10000,
            shard_count: 64,
        }
    }
}

impl StorageConfig {
    /// Create config with WAL enabled at the given path
    pub fn with_wal<P: AsRef<Path>>(path: P) -> Self {
        StorageConfig {
            wal_path: Some(path.as_ref().to_string_lossy().to_string()),
            ..Default::default()
        }
    }

    /// Create config for in-memory only storage
    pub fn in_memory() -> Self {
        StorageConfig {
            wal_path: None,
            compaction_threshold: 0,
            ..Default::default()
        }
    }

    pub fn with_shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Create config from environment variables.
    ///
    /// Each replica writes its own log file, `<TALLY_DATA_DIR>/<replica_id>.wal`.
    pub fn from_env(replica_id: &str) -> Self {
        let mut config = Self::default();

        let persist = std::env::var("TALLY_PERSIST")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(true);
        if persist {
            let data_dir = std::env::var("TALLY_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
            config.wal_path = Some(format!("{}/{}.wal", data_dir.trim_end_matches('/'), replica_id));
        }

        if let Ok(count) = std::env::var("TALLY_SHARD_COUNT") {
            match count.parse() {
                Ok(n) => config.shard_count = n,
                Err(e) => log::warn!("Invalid TALLY_SHARD_COUNT '{}': {}", count, e),
            }
        }

        if let Ok(threshold) = std::env::var("TALLY_COMPACTION_THRESHOLD") {
            match threshold.parse() {
                Ok(n) => config.compaction_threshold = n,
                Err(e) => log::warn!("Invalid TALLY_COMPACTION_THRESHOLD '{}': {}", threshold, e),
            }
        }

        config
    }
}
