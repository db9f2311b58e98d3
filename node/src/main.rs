//! Binary entry point: builds [`Config`], opens the persistent stores,
//! seeds a [`HeaderGraph`] with the chain's genesis, constructs and starts
//! a [`PeerPool`], and forwards `NewChainTip` events to a logging sink.
//!
//! Mirrors `nakamoto-node::run()`'s startup ordering: build config →
//! open/heal store → build cache/graph → load address book → construct
//! protocol → run reactor.

mod config;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use headers_chain::HeaderGraph;
use headers_common::PeerAddress;
use headers_p2p::bootstrap::HttpBootstrapSource;
use headers_p2p::liveness::HttpLivenessProbe;
use headers_p2p::pool::ChainParams;
use headers_p2p::transport::TokioTcpDialer;
use headers_p2p::{Event, PeerPool};

use config::Config;
use store::{HeaderStore, MemoryHeaderStore, MemoryPeerMetricsStore, PeerMetricsStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = Config::load("headers-node.toml")?;
    let chain = cfg.resolved_chain()?;
    tracing::info!(chain = %cfg.chain, "initializing header-sync node");

    let header_store = MemoryHeaderStore::default();
    let peer_metrics_store = MemoryPeerMetricsStore::default();
    let previously_saved = header_store.load().await?;
    tracing::info!(count = previously_saved.len(), "opened header store");
    let _ = peer_metrics_store.load().await?;

    let genesis = chain.genesis();
    tracing::info!(hash = %genesis.hash(), "genesis header for configured chain");
    let graph = Arc::new(RwLock::new(HeaderGraph::new(genesis, chain.built_in_invalid_blocks())));

    let seed_addresses = resolve_seed_addresses(&chain).await;
    tracing::info!(count = seed_addresses.len(), "resolved DNS seed addresses");

    let chain_params = ChainParams {
        magic: chain.magic(),
        protocol_version: chain.protocol_version(),
        user_agent: chain.user_agent().to_string(),
        invalid_hashes: chain.built_in_invalid_blocks(),
        seed_addresses,
    };

    let bootstrap: Arc<dyn headers_p2p::bootstrap::BootstrapSource> = match &cfg.bootstrap_url {
        Some(url) => Arc::new(HttpBootstrapSource::new(url.clone())),
        None => Arc::new(HttpBootstrapSource::new("https://bootstrap.invalid/peers")),
    };

    let (tip_tx, mut tip_rx) = mpsc::unbounded_channel::<Event>();
    let pool = PeerPool::new(
        cfg.pool_config(),
        chain_params,
        Arc::clone(&graph),
        Arc::new(TokioTcpDialer),
        Arc::new(HttpLivenessProbe::default()),
        bootstrap,
        tip_tx,
    );

    for addr in &cfg.connect {
        pool.queue_priority(PeerAddress::from(*addr)).await;
    }

    pool.start();

    let sink = tokio::spawn(async move {
        while let Some(event) = tip_rx.recv().await {
            if let Event::NewChainTip { peer, height, hash_hex } = event {
                tracing::info!(%peer, height, hash = %hash_hex, "new chain tip");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, disposing sessions");
    pool.stop().await;
    sink.abort();

    Ok(())
}

/// Resolve every DNS seed hostname configured for `chain` into concrete
/// addresses, skipping any that fail to resolve rather than failing
/// startup outright.
async fn resolve_seed_addresses(chain: &headers_common::Chain) -> Vec<PeerAddress> {
    let mut resolved = Vec::new();
    for (host, port) in chain.seed_addresses() {
        match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => resolved.extend(addrs.map(|a: SocketAddr| PeerAddress::from(a))),
            Err(e) => tracing::warn!(host, error = %e, "DNS seed lookup failed"),
        }
    }
    resolved
}
