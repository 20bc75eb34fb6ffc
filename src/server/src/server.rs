use std::sync::Arc;
use log::info;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use cluster::{ClusterConfig, CounterManager, HttpTransport};
use storage::{CounterStore, Storage, StorageConfig};

use crate::error::ServerError;
use crate::http::{self, AppState};

pub struct Server {
    cluster: ClusterConfig,
    storage: StorageConfig,
}

impl Server {
    /// Build a replica from `TALLY_*` environment variables
    pub fn new() -> Result<Self, ServerError> {
        let cluster = ClusterConfig::from_env()?;
        let storage = StorageConfig::from_env(&cluster.replica_id);
        Ok(Server::with_config(cluster, storage))
    }

    pub fn with_config(cluster: ClusterConfig, storage: StorageConfig) -> Self {
        Server { cluster, storage }
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        match &self.storage.wal_path {
            Some(path) => info!("Persistence enabled, WAL path: {}", path),
            None => info!("Running in memory-only mode (no persistence)"),
        }
        let store: Arc<dyn CounterStore> = Arc::new(Storage::open(self.storage.clone()).await?);

        let registry = self.cluster.registry();
        for peer in registry.peers() {
            info!("Peer replica: {}", peer);
        }
        let transport = Arc::new(HttpTransport::new(self.cluster.peer_timeout)?);
        let manager = Arc::new(CounterManager::new(
            registry,
            store.clone(),
            transport,
            self.cluster.push_policy,
        ));

        let addr = format!("{}:{}", self.cluster.host, self.cluster.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(
            "TALLY replica '{}' is running on http://{} ({} peers) ...",
            self.cluster.replica_id,
            addr,
            manager.registry().peer_count()
        );

        // Shutdown broadcast channel
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let sweep_rx = shutdown_tx.subscribe();
        let http_rx = shutdown_tx.subscribe();

        // Spawn signal handler
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                info!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Received shutdown signal, stopping replica...");
            let _ = shutdown_tx_clone.send(());
        });

        let sweep = manager.controller().clone().start_sweep(self.cluster.sweep_interval, sweep_rx);

        let state = Arc::new(AppState::new(manager, store));
        http::serve(listener, state, http_rx).await;

        if let Err(e) = sweep.await {
            info!("Sweep task ended abnormally: {}", e);
        }
        info!("TALLY replica stopped");
        Ok(())
    }
}
