pub mod error;
pub mod http;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use error::ServerError;
pub use http::{serve, AppState};
pub use metrics::Metrics;
pub use server::Server;

pub use cluster::{ClusterConfig, CounterManager};
pub use storage::StorageConfig;
