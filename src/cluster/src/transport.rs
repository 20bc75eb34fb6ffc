use std::time::Duration;
use async_trait::async_trait;
use storage::ContentId;

use crate::error::TransportError;
use crate::types::{Peer, SyncMessage};

/// Outbound calls from one replica to another.
///
/// Calls are single attempts; callers treat any error as a dropped message.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver this replica's partition value to a peer's merge endpoint
    async fn send_sync(&self, peer: &Peer, message: &SyncMessage) -> Result<(), TransportError>;

    /// Ask a peer to broadcast its own partition for `content_id` now
    async fn send_force_sync(&self, peer: &Peer, content_id: ContentId) -> Result<(), TransportError>;
}

/// JSON-over-HTTP transport with a per-request timeout and no retries
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send_sync(&self, peer: &Peer, message: &SyncMessage) -> Result<(), TransportError> {
        let response = self.client
            .post(peer.sync_url())
            .json(message)
            .send()
            .await?;
        check_status(response.status())
    }

    async fn send_force_sync(&self, peer: &Peer, content_id: ContentId) -> Result<(), TransportError> {
        let response = self.client
            .post(peer.force_sync_url(content_id))
            .send()
            .await?;
        check_status(response.status())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Rejected(status.as_u16()))
    }
}

/// In-process transport wiring several replicas together for tests.
#[cfg(test)]
pub(crate) mod loopback {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use async_trait::async_trait;
    use storage::ContentId;

    use super::PeerTransport;
    use crate::error::TransportError;
    use crate::merge::MergeEngine;
    use crate::propagation::PropagationController;
    use crate::types::{Peer, SyncMessage};

    #[derive(Clone)]
    struct Node {
        merge: MergeEngine,
        controller: Arc<PropagationController>,
    }

    #[derive(Default)]
    pub struct LoopbackTransport {
        nodes: Mutex<HashMap<String, Node>>,
        down: Mutex<HashSet<String>>,
        stalled: Mutex<HashMap<String, Duration>>,
        delivered: Mutex<Vec<(String, SyncMessage)>>,
    }

    impl LoopbackTransport {
        pub fn register(&self, base_url: &str, merge: MergeEngine, controller: Arc<PropagationController>) {
            self.nodes
                .lock()
                .unwrap()
                .insert(Peer::new(base_url).base_url().to_string(), Node { merge, controller });
        }

        pub fn set_down(&self, base_url: &str, down: bool) {
            let mut set = self.down.lock().unwrap();
            if down {
                set.insert(base_url.to_string());
            } else {
                set.remove(base_url);
            }
        }

        /// Sends to `base_url` wait `delay` and then fail, like a request timing out
        pub fn set_stalled(&self, base_url: &str, delay: Option<Duration>) {
            let mut stalled = self.stalled.lock().unwrap();
            match delay {
                Some(delay) => stalled.insert(base_url.to_string(), delay),
                None => stalled.remove(base_url),
            };
        }

        /// (destination, message) pairs delivered so far
        pub fn delivered(&self) -> Vec<(String, SyncMessage)> {
            self.delivered.lock().unwrap().clone()
        }

        fn node(&self, peer: &Peer) -> Result<Node, TransportError> {
            if self.down.lock().unwrap().contains(peer.base_url()) {
                return Err(TransportError::Rejected(503));
            }
            self.nodes
                .lock()
                .unwrap()
                .get(peer.base_url())
                .cloned()
                .ok_or(TransportError::Rejected(404))
        }
    }

    #[async_trait]
    impl PeerTransport for LoopbackTransport {
        async fn send_sync(&self, peer: &Peer, message: &SyncMessage) -> Result<(), TransportError> {
            let stall = self.stalled.lock().unwrap().get(peer.base_url()).copied();
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
                return Err(TransportError::Rejected(504));
            }
            let node = self.node(peer)?;
            node.merge
                .merge(message.content_id, &message.source_replica_id, message.count)
                .await
                .map_err(|_| TransportError::Rejected(500))?;
            self.delivered
                .lock()
                .unwrap()
                .push((peer.base_url().to_string(), message.clone()));
            Ok(())
        }

        async fn send_force_sync(&self, peer: &Peer, content_id: ContentId) -> Result<(), TransportError> {
            let node = self.node(peer)?;
            node.controller.broadcast(content_id).await;
            Ok(())
        }
    }
}
