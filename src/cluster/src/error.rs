/// Invalid replica configuration
#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { var: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{} must not be empty", var),
            ConfigError::Invalid { var, value } => write!(f, "Invalid value for {}: '{}'", var, value),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure talking to a peer replica
#[derive(Debug)]
pub enum TransportError {
    Http(reqwest::Error),
    /// Peer answered with a non-success status code
    Rejected(u16),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Http(e) if e.is_timeout() => write!(f, "peer timed out: {}", e),
            TransportError::Http(e) => write!(f, "HTTP error: {}", e),
            TransportError::Rejected(status) => write!(f, "peer rejected request with status {}", status),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Http(e) => Some(e),
            TransportError::Rejected(_) => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err)
    }
}

/// Sync payload that failed validation at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessageError {
    MissingReplicaId,
    ReplicaIdTooLong(usize),
    MissingContentId,
    NegativeContentId(i64),
    MissingCount,
    NegativeCount(i64),
}

impl std::fmt::Display for SyncMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMessageError::MissingReplicaId => write!(f, "sourceReplicaId is required"),
            SyncMessageError::ReplicaIdTooLong(len) => {
                write!(f, "sourceReplicaId is {} bytes long (max {})", len, crate::types::MAX_REPLICA_ID_LEN)
            }
            SyncMessageError::MissingContentId => write!(f, "videoId is required"),
            SyncMessageError::NegativeContentId(id) => write!(f, "videoId must not be negative (got {})", id),
            SyncMessageError::MissingCount => write!(f, "count is required"),
            SyncMessageError::NegativeCount(count) => write!(f, "count must not be negative (got {})", count),
        }
    }
}

impl std::error::Error for SyncMessageError {}
