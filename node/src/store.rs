//! Persistent collaborators, stubbed as traits (spec §4.7): a header store
//! and a peer-metrics store. Production adapters (e.g. a real RocksDB- or
//! sled-backed store) are out of scope; these in-memory reference
//! implementations exist so the workspace compiles and is testable
//! end-to-end, the way the teacher's `store::File` stands in for a real
//! database in `nakamoto-node::run()`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use headers_chain::HeaderNode;
use headers_common::PeerAddress;
use headers_p2p::PeerMetrics;

/// Persists the header tree across restarts.
#[async_trait]
pub trait HeaderStore: Send + Sync {
    /// Persist every node currently on the longest chain, in height order.
    async fn save(&self, nodes: &[HeaderNode]) -> anyhow::Result<()>;
    /// Load a previously-persisted longest chain, if any.
    async fn load(&self) -> anyhow::Result<Vec<HeaderNode>>;
}

/// Persists per-address peer reputation data across restarts.
#[async_trait]
pub trait PeerMetricsStore: Send + Sync {
    /// Persist the current metrics snapshot.
    async fn save(&self, metrics: &HashMap<PeerAddress, PeerMetrics>) -> anyhow::Result<()>;
    /// Load a previously-persisted metrics snapshot, if any.
    async fn load(&self) -> anyhow::Result<HashMap<PeerAddress, PeerMetrics>>;
}

/// An in-memory [`HeaderStore`], for tests and as the default when no
/// persistent path is configured.
#[derive(Default)]
pub struct MemoryHeaderStore {
    nodes: RwLock<Vec<HeaderNode>>,
}

#[async_trait]
impl HeaderStore for MemoryHeaderStore {
    async fn save(&self, nodes: &[HeaderNode]) -> anyhow::Result<()> {
        *self.nodes.write().expect("header store mutex poisoned") = nodes.to_vec();
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Vec<HeaderNode>> {
        Ok(self.nodes.read().expect("header store mutex poisoned").clone())
    }
}

/// An in-memory [`PeerMetricsStore`], for tests and as the default when no
/// persistent path is configured.
#[derive(Default)]
pub struct MemoryPeerMetricsStore {
    by_addr: RwLock<HashMap<PeerAddress, PeerMetrics>>,
}

#[async_trait]
impl PeerMetricsStore for MemoryPeerMetricsStore {
    async fn save(&self, metrics: &HashMap<PeerAddress, PeerMetrics>) -> anyhow::Result<()> {
        *self.by_addr.write().expect("metrics store mutex poisoned") = metrics.clone();
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<HashMap<PeerAddress, PeerMetrics>> {
        Ok(self.by_addr.read().expect("metrics store mutex poisoned").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_header_store_round_trips() {
        let store = MemoryHeaderStore::default();
        assert!(store.load().await.unwrap().is_empty());

        let genesis = headers_common::Chain::Bsv.genesis();
        let node = HeaderNode::genesis(genesis);
        store.save(&[node]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![node]);
    }

    #[tokio::test]
    async fn memory_peer_metrics_store_round_trips() {
        let store = MemoryPeerMetricsStore::default();
        assert!(store.load().await.unwrap().is_empty());

        let addr = PeerAddress::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)), 8333);
        let mut snapshot = HashMap::new();
        snapshot.insert(addr, PeerMetrics::default());
        store.save(&snapshot).await.unwrap();

        assert_eq!(store.load().await.unwrap().len(), 1);
    }
}
