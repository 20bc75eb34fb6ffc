use cluster::{ConfigError, TransportError};
use storage::StorageError;

/// Error type for replica startup and serving errors
#[derive(Debug)]
pub enum ServerError {
    InvalidPort(String),
    InvalidConfig(ConfigError),
    IoError(std::io::Error),
    StorageError(StorageError),
    TransportError(TransportError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::InvalidPort(msg) => write!(f, "Invalid port: {}", msg),
            ServerError::InvalidConfig(e) => write!(f, "Invalid configuration: {}", e),
            ServerError::IoError(e) => write!(f, "IO error: {}", e),
            ServerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ServerError::TransportError(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::InvalidPort(_) => None,
            ServerError::InvalidConfig(e) => Some(e),
            ServerError::IoError(e) => Some(e),
            ServerError::StorageError(e) => Some(e),
            ServerError::TransportError(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::IoError(err)
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { var: "TALLY_PORT", value } => ServerError::InvalidPort(value),
            other => ServerError::InvalidConfig(other),
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        ServerError::StorageError(err)
    }
}

impl From<TransportError> for ServerError {
    fn from(err: TransportError) -> Self {
        ServerError::TransportError(err)
    }
}
