use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policy::PushPolicy;
use crate::registry::ReplicaRegistry;

const DEFAULT_REPLICA_ID: &str = "replica_1";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

/// Replica configuration
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub replica_id: String,
    pub host: String,
    pub port: u16,
    /// This replica's own base URL as peers see it; filtered out of `peers`
    pub public_url: Option<String>,
    /// Peer base URLs (e.g. http://10.0.0.2:8080)
    pub peers: Vec<String>,
    /// Timeout for each outbound peer call (default: 2000ms)
    pub peer_timeout: Duration,
    /// Anti-entropy sweep period (default: 120s)
    pub sweep_interval: Duration,
    pub push_policy: PushPolicy,
}

impl ClusterConfig {
    pub fn new(replica_id: &str) -> Self {
        ClusterConfig {
            replica_id: replica_id.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            public_url: None,
            peers: Vec::new(),
            peer_timeout: Duration::from_millis(2000),
            sweep_interval: Duration::from_secs(120),
            push_policy: PushPolicy::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let replica_id = lookup("TALLY_REPLICA_ID").unwrap_or_else(|| DEFAULT_REPLICA_ID.to_string());
        let replica_id = replica_id.trim().to_string();
        if replica_id.is_empty() {
            return Err(ConfigError::Missing("TALLY_REPLICA_ID"));
        }
        if replica_id.len() > crate::types::MAX_REPLICA_ID_LEN {
            return Err(ConfigError::Invalid { var: "TALLY_REPLICA_ID", value: replica_id });
        }

        let mut config = ClusterConfig::new(&replica_id);

        if let Some(host) = lookup("TALLY_HOST") {
            config.host = host;
        }
        config.port = parse_var(&lookup, "TALLY_PORT", DEFAULT_PORT)?;

        config.public_url = lookup("TALLY_PUBLIC_URL").filter(|url| !url.trim().is_empty());

        let peers_str = lookup("TALLY_PEERS").unwrap_or_default();
        config.peers = peers_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        config.peer_timeout = Duration::from_millis(parse_var(&lookup, "TALLY_PEER_TIMEOUT_MS", 2000u64)?);
        config.sweep_interval = Duration::from_secs(parse_var(&lookup, "TALLY_SWEEP_INTERVAL_SECS", 120u64)?);
        if config.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid { var: "TALLY_SWEEP_INTERVAL_SECS", value: "0".to_string() });
        }

        let defaults = PushPolicy::default();
        config.push_policy = PushPolicy {
            low_watermark: parse_var(&lookup, "TALLY_PUSH_LOW_WATERMARK", defaults.low_watermark)?,
            every_low: parse_var(&lookup, "TALLY_PUSH_EVERY_LOW", defaults.every_low)?,
            every_high: parse_var(&lookup, "TALLY_PUSH_EVERY_HIGH", defaults.every_high)?,
        };

        Ok(config)
    }

    pub fn registry(&self) -> ReplicaRegistry {
        ReplicaRegistry::new(&self.replica_id, &self.peers, self.public_url.as_deref())
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
