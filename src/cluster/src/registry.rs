use std::collections::HashSet;

use crate::types::Peer;

/// This replica's identity and the peers it propagates to.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ReplicaRegistry {
    local_id: String,
    peers: Vec<Peer>,
}

impl ReplicaRegistry {
    /// Build a registry from peer base URLs.
    ///
    /// Blank entries, duplicates and `own_url` (this replica's public address,
    /// when known) are dropped.
    pub fn new<S: AsRef<str>>(local_id: &str, peer_urls: &[S], own_url: Option<&str>) -> Self {
        let own = own_url.map(Peer::new);
        let mut seen = HashSet::new();
        let mut peers = Vec::new();

        for url in peer_urls {
            let url = url.as_ref().trim();
            if url.is_empty() {
                continue;
            }
            let peer = Peer::new(url);
            if own.as_ref() == Some(&peer) {
                continue;
            }
            if seen.insert(peer.clone()) {
                peers.push(peer);
            }
        }

        ReplicaRegistry {
            local_id: local_id.to_string(),
            peers,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_filters_peers() {
        let registry = ReplicaRegistry::new(
            "replica_1",
            &["http://a:8080", "", "http://b:8080/", "http://b:8080", "http://me:8080"],
            Some("http://me:8080/"),
        );

        assert_eq!(registry.local_id(), "replica_1");
        let urls: Vec<&str> = registry.peers().iter().map(|p| p.base_url()).collect();
        assert_eq!(urls, vec!["http://a:8080", "http://b:8080"]);
        assert_eq!(registry.peer_count(), 2);
    }

    #[test]
    fn test_registry_without_peers() {
        let registry = ReplicaRegistry::new::<&str>("solo", &[], None);
        assert!(registry.peers().is_empty());
    }
}
