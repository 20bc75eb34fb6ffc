pub mod config;
pub mod counter;
pub mod error;
pub mod merge;
pub mod policy;
pub mod propagation;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use config::ClusterConfig;
pub use counter::CounterManager;
pub use error::{ConfigError, SyncMessageError, TransportError};
pub use merge::MergeEngine;
pub use policy::PushPolicy;
pub use propagation::PropagationController;
pub use registry::ReplicaRegistry;
pub use transport::{HttpTransport, PeerTransport};
pub use types::*;
