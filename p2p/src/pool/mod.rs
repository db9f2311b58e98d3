//! The reputation-aware connection pool: maintains a target number of
//! healthy sessions, scores every known peer, blacklists the bad ones,
//! and defends against mass-disconnect Sybil attacks. Spec §4.5.
//!
//! Grounded in the teacher's `nakamoto_node::run()` startup/address-book
//! ordering (build config → load address book → connect), generalized from
//! its synchronous reactor loop onto one `tokio` worker task per candidate
//! connection, the way the rest of this workspace departs from the
//! teacher's single-threaded `nakamoto-net-poll` (see SPEC_FULL.md §0).

pub mod metrics;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use headers_chain::HeaderGraph;
use headers_common::{Hash, PeerAddress};

pub use metrics::PeerMetrics;
use metrics::now_ms;

use crate::bootstrap::BootstrapSource;
use crate::config::PoolConfig;
use crate::error::SessionError;
use crate::event::Event;
use crate::liveness::LivenessProbe;
use crate::session::{DisconnectReason, PeerSession, SessionTimeouts};
use crate::transport::TcpDialer;

/// The chain-specific parameters every session this pool spawns shares.
#[derive(Clone)]
pub struct ChainParams {
    /// Network magic, first four bytes of every frame.
    pub magic: u32,
    /// Protocol version advertised in `version`.
    pub protocol_version: i32,
    /// User-agent string advertised in `version`.
    pub user_agent: String,
    /// Hashes the graph quarantines; also probed by `onValidChain`.
    pub invalid_hashes: Vec<Hash>,
    /// Hard-coded fallback addresses, tried last.
    pub seed_addresses: Vec<PeerAddress>,
}

/// The indexed, persisted store of [`PeerMetrics`], keyed by address.
///
/// Spec §4.5.2 calls for an ordered `seen_time → {addresses}` index and an
/// ordered `rating → {addresses}` index, each rebuilt lazily. This
/// implementation keeps the canonical map as the source of truth and
/// recomputes both views on demand — correct, and simpler than maintaining
/// two synchronized `BTreeMap`s by hand, at the cost of an O(n) scan per
/// selection rather than an O(log n) index lookup; `n` here is bounded by
/// `max_addresses` (4000), so the scan is cheap in practice.
struct MetricsStore {
    by_addr: RwLock<HashMap<PeerAddress, PeerMetrics>>,
}

impl MetricsStore {
    fn new() -> Self {
        MetricsStore { by_addr: RwLock::new(HashMap::new()) }
    }

    async fn mutate(&self, addr: PeerAddress, f: impl FnOnce(&mut PeerMetrics)) {
        let mut map = self.by_addr.write().await;
        f(map.entry(addr).or_default());
    }

    async fn rating(&self, addr: &PeerAddress, now: i64) -> f64 {
        self.by_addr.read().await.get(addr).map(|m| m.rating(now)).unwrap_or(0.5)
    }

    async fn non_blacklisted_count(&self, threshold: f64) -> usize {
        let now = now_ms();
        self.by_addr
            .read()
            .await
            .iter()
            .filter(|(_, m)| m.rating(now) >= threshold)
            .count()
    }

    /// Top `n` non-blacklisted, non-excluded addresses by rating,
    /// highest first.
    async fn top_rated(&self, excluded: &HashSet<PeerAddress>, threshold: f64, n: usize) -> Vec<PeerAddress> {
        let now = now_ms();
        let map = self.by_addr.read().await;
        let mut scored: Vec<(PeerAddress, f64)> = map
            .iter()
            .filter(|(addr, _)| !excluded.contains(addr))
            .map(|(addr, m)| (*addr, m.rating(now)))
            .filter(|(_, rating)| *rating >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(n).map(|(addr, _)| addr).collect()
    }

    async fn register_known(&self, addrs: impl IntoIterator<Item = PeerAddress>) {
        let now = now_ms();
        let mut map = self.by_addr.write().await;
        for addr in addrs {
            map.entry(addr).or_default().add_seen(now);
        }
    }

    async fn known_count(&self) -> usize {
        self.by_addr.read().await.len()
    }

    /// Drop the oldest-seen surplus once the store exceeds `max`, never
    /// touching an address currently in `keep`.
    async fn trim_oldest(&self, max: usize, keep: &HashSet<PeerAddress>) {
        let mut map = self.by_addr.write().await;
        if map.len() <= max {
            return;
        }
        let mut by_seen: Vec<(PeerAddress, i64)> = map
            .iter()
            .filter(|(addr, _)| !keep.contains(addr))
            .map(|(addr, m)| (*addr, m.last_seen_ms.unwrap_or(0)))
            .collect();
        by_seen.sort_by_key(|(_, seen)| *seen);
        let overflow = map.len() - max;
        for (addr, _) in by_seen.into_iter().take(overflow) {
            map.remove(&addr);
        }
    }
}

/// Maintains a target number of healthy, verified peer connections and the
/// reputation data that drives which peers are chosen.
pub struct PeerPool {
    config: PoolConfig,
    chain: ChainParams,
    graph: Arc<RwLock<HeaderGraph>>,
    metrics: MetricsStore,
    blacklist_threshold: f64,
    sessions: RwLock<HashMap<PeerAddress, Arc<PeerSession>>>,
    in_flight: RwLock<HashSet<PeerAddress>>,
    priority_queue: Mutex<Vec<PeerAddress>>,
    dialer: Arc<dyn TcpDialer>,
    liveness: Arc<dyn LivenessProbe>,
    bootstrap: Arc<dyn BootstrapSource>,
    events_tx: mpsc::UnboundedSender<Event>,
    tip_events_tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
    syncing_count: AtomicUsize,
    /// Shared across every session this pool spawns, so one peer's inbound
    /// traffic counts as internet-liveness evidence for its siblings'
    /// keepalive loops (spec §4.4.4).
    internet_clock: Arc<AtomicI64>,
}

impl PeerPool {
    /// Construct a pool. `tip_events_tx` is the application-facing channel
    /// that only ever receives [`Event::NewChainTip`] (spec §6: the sole
    /// contractual output); every other event is internal bookkeeping.
    pub fn new(
        config: PoolConfig,
        chain: ChainParams,
        graph: Arc<RwLock<HeaderGraph>>,
        dialer: Arc<dyn TcpDialer>,
        liveness: Arc<dyn LivenessProbe>,
        bootstrap: Arc<dyn BootstrapSource>,
        tip_events_tx: mpsc::UnboundedSender<Event>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let threshold = metrics::compute_blacklist_threshold();
        info!(threshold, "computed blacklist rating threshold from canonical profiles");

        let pool = Arc::new(PeerPool {
            config,
            chain,
            graph,
            metrics: MetricsStore::new(),
            blacklist_threshold: threshold,
            sessions: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashSet::new()),
            priority_queue: Mutex::new(Vec::new()),
            dialer,
            liveness,
            bootstrap,
            events_tx,
            tip_events_tx,
            cancel: CancellationToken::new(),
            syncing_count: AtomicUsize::new(0),
            internet_clock: Arc::new(AtomicI64::new(0)),
        });

        let event_pool = Arc::clone(&pool);
        tokio::spawn(async move { event_pool.run_event_loop(events_rx).await });

        pool
    }

    /// Idempotent: spawns worker tasks up to `num_workers`, and the health
    /// monitor once the first successful connection is made. A second call
    /// while already running is a no-op beyond re-arming a fresh
    /// cancellation token if the pool had previously been stopped.
    pub fn start(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            warn!("start() called after stop(); construct a new PeerPool to restart");
            return;
        }
        for worker_id in 0..self.config.num_workers {
            let pool = Arc::clone(self);
            let cancel = self.cancel.clone();
            tokio::spawn(async move { pool.worker_loop(worker_id, cancel).await });
        }

        let pool = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move { pool.health_monitor(cancel).await });
    }

    /// Abort every worker and the health monitor, then dispose every
    /// active session (flushing their pending correlators).
    pub async fn stop(&self) {
        self.cancel.cancel();
        let sessions = self.sessions.write().await;
        for session in sessions.values() {
            session.dispose(DisconnectReason::Intentional);
        }
    }

    /// Queue an address to be dialed ahead of rating-based selection, e.g.
    /// one supplied by the application as a known-good peer.
    pub async fn queue_priority(&self, addr: PeerAddress) {
        self.priority_queue.lock().await.push(addr);
    }

    /// Number of currently verified, `Ready` sessions.
    pub async fn verified_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[instrument(skip(self, cancel), fields(worker_id))]
    async fn worker_loop(self: Arc<Self>, worker_id: usize, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            if self.verified_count().await >= self.config.target_num_connections {
                // Enough sessions; park this worker rather than burn a
                // candidate pick. The event loop wakes replacements on
                // disconnect rather than waking parked workers, so this
                // one simply polls at a low rate until it's needed again.
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                }
            }

            let Some(addr) = self.pick_candidate().await else {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(500)) => continue,
                }
            };

            let session = Arc::new(PeerSession::with_internet_clock(
                addr,
                self.chain.magic,
                self.chain.protocol_version,
                self.chain.user_agent.clone(),
                Arc::clone(&self.graph),
                self.events_tx.clone(),
                SessionTimeouts {
                    connect: self.config.default_request_timeout,
                    handshake: self.config.default_request_timeout,
                    request: self.config.default_request_timeout,
                    getaddr: self.config.default_getaddr_timeout,
                    ping_interval: self.config.ping_interval,
                },
                Arc::clone(&self.internet_clock),
            ));

            let result = self.verify(&session, &cancel).await;
            self.in_flight.write().await.remove(&addr);

            match result {
                Ok(()) => {
                    let mut sessions = self.sessions.write().await;
                    if sessions.len() >= self.config.target_num_connections {
                        // REDESIGN FLAG (spec §9 open question): the
                        // source tears down the newest excess session
                        // rather than evicting the lowest-rated existing
                        // one. We keep that choice — evicting by rating
                        // would need a second rating pass mid-install.
                        drop(sessions);
                        session.dispose(DisconnectReason::Intentional);
                    } else {
                        sessions.insert(addr, session);
                    }
                }
                Err(e) => {
                    debug!(peer = %addr, error = %e, "candidate failed verification");
                    if !self.liveness.is_online(Duration::from_secs(2)).await {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    /// `connect → ping → onValidChain → sync_headers`, opportunistically
    /// followed by `getaddr` if the known-peer database is thin. Any step
    /// failing disposes the session with the right classification so the
    /// event loop's metric update sees a `Disconnected` event.
    async fn verify(&self, session: &Arc<PeerSession>, token: &CancellationToken) -> Result<(), SessionError> {
        session.connect(&*self.dialer).await?;

        if let Err(e) = session.ping(token).await {
            session.dispose(DisconnectReason::UnintentionalAfterConnect);
            return Err(e);
        }

        match session.on_valid_chain(&self.chain.invalid_hashes, token).await {
            Ok(true) => {}
            Ok(false) => {
                session.dispose(DisconnectReason::UnintentionalAfterConnect);
                return Err(SessionError::InvalidChain);
            }
            Err(e) => {
                session.dispose(DisconnectReason::UnintentionalAfterConnect);
                return Err(e);
            }
        }

        self.syncing_count.fetch_add(1, Ordering::SeqCst);
        let sync_result = session.sync_headers(token).await;
        self.syncing_count.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = sync_result {
            session.dispose(DisconnectReason::UnintentionalAfterConnect);
            return Err(e);
        }

        if self.metrics.known_count().await < self.config.bootstrap_floor {
            let _ = session.get_addr(token).await;
        }

        self.metrics.mutate(session.addr, |m| m.add_last_connect_and_test(now_ms())).await;
        Ok(())
    }

    /// A caller-specified priority address, else the single top-rated
    /// non-blacklisted, not-already-connected-or-dialing candidate.
    /// Bootstraps fresh addresses first if the known set is thin.
    async fn pick_candidate(&self) -> Option<PeerAddress> {
        if let Some(addr) = self.priority_queue.lock().await.pop() {
            return Some(addr);
        }

        if self.metrics.non_blacklisted_count(self.blacklist_threshold).await < self.config.bootstrap_floor {
            self.bootstrap_addresses().await;
        }

        let excluded = self.excluded_addresses().await;
        let top = self.metrics.top_rated(&excluded, self.blacklist_threshold, 1).await;
        if let Some(&addr) = top.first() {
            self.in_flight.write().await.insert(addr);
            return Some(addr);
        }

        for &seed in &self.chain.seed_addresses {
            if !excluded.contains(&seed) {
                self.in_flight.write().await.insert(seed);
                return Some(seed);
            }
        }
        None
    }

    async fn excluded_addresses(&self) -> HashSet<PeerAddress> {
        let mut excluded: HashSet<PeerAddress> = self.sessions.read().await.keys().copied().collect();
        excluded.extend(self.in_flight.read().await.iter().copied());
        excluded
    }

    /// One-shot HTTPS bootstrap fetch, falling back silently to
    /// hard-coded seeds on failure (spec: `BootstrapFailure` is logged,
    /// never fatal).
    async fn bootstrap_addresses(&self) {
        match self.bootstrap.fetch().await {
            Ok(addrs) if !addrs.is_empty() => {
                info!(count = addrs.len(), "merged bootstrap addresses into peer database");
                self.metrics.register_known(addrs).await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "bootstrap fetch failed, falling back to seed addresses"),
        }
        self.metrics.register_known(self.chain.seed_addresses.iter().copied()).await;
    }

    /// Consumes every [`Event`] emitted by every session this pool owns,
    /// updating metrics and forwarding `NewChainTip` to the application.
    async fn run_event_loop(self: Arc<Self>, mut events_rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                Event::NewChainTip { .. } => {
                    let _ = self.tip_events_tx.send(event);
                }
                Event::Connected { peer } => {
                    self.metrics.mutate(peer, |m| m.add_last_connect(now_ms())).await;
                }
                Event::Pong { peer, latency } => {
                    self.metrics
                        .mutate(peer, |m| m.add_ping(latency.as_millis() as i64, now_ms()))
                        .await;
                }
                Event::Addr { peer, addresses } => {
                    self.metrics.mutate(peer, |m| m.add_data_received(now_ms())).await;
                    self.metrics.register_known(addresses).await;
                }
                Event::BlockHashes { peer, .. } => {
                    self.metrics.mutate(peer, |m| m.add_data_received(now_ms())).await;
                }
                Event::InvalidBlocks { peer, .. } => {
                    self.metrics.mutate(peer, |m| m.add_invalid_chain(now_ms())).await;
                }
                Event::OutOfSync { peer } => {
                    self.metrics.mutate(peer, |m| m.add_out_of_sync(now_ms())).await;
                }
                Event::Disconnected { peer, reason } => {
                    self.sessions.write().await.remove(&peer);
                    self.on_disconnect(peer, reason).await;
                }
            }
        }
    }

    async fn on_disconnect(self: &Arc<Self>, peer: PeerAddress, reason: DisconnectReason) {
        match reason {
            DisconnectReason::Intentional => {}
            DisconnectReason::UnintentionalBeforeConnect => {
                self.metrics
                    .mutate(peer, |m| m.add_unintentional_disconnect(now_ms(), false))
                    .await;
            }
            DisconnectReason::UnintentionalAfterConnect => {
                // Spec §4.5.5: don't penalize on the spot — a coordinated
                // mass-disconnect looks identical to one hostile peer
                // until we've seen whether siblings also dropped within
                // the window. Count on a separate task so the event loop
                // keeps draining other peers' disconnects during the wait.
                let before = self.verified_count().await;
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.judge_mass_disconnect(peer, before).await });
            }
        }
    }

    /// Spec §4.5.5's Sybil defense: if more than half of the peers that
    /// were connected just before this disconnect have also dropped by
    /// the end of the window, treat it as a network blip and don't
    /// penalize; otherwise record the disconnect normally.
    async fn judge_mass_disconnect(self: Arc<Self>, peer: PeerAddress, before: usize) {
        tokio::time::sleep(self.config.recent_disconnect_window).await;
        let remaining = self.verified_count().await;

        let before = before as i64;
        let remaining = remaining as i64;
        let looks_like_a_blip = remaining + (before / 2) - 1 < before;

        if looks_like_a_blip {
            debug!(peer = %peer, before, remaining, "mass-disconnect pattern detected, not penalizing");
        } else {
            self.metrics
                .mutate(peer, |m| m.add_unintentional_disconnect(now_ms(), true))
                .await;
        }
    }

    /// Spec §4.5.4: every `health_cycle`, refresh the address book, trim
    /// it if oversized, re-sync every verified session, and prune stale
    /// branches once nothing is actively syncing.
    async fn health_monitor(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.health_cycle) => {}
            }

            if let Some(addr) = self.pick_candidate().await {
                let session = Arc::new(PeerSession::with_internet_clock(
                    addr,
                    self.chain.magic,
                    self.chain.protocol_version,
                    self.chain.user_agent.clone(),
                    Arc::clone(&self.graph),
                    self.events_tx.clone(),
                    SessionTimeouts::default(),
                    Arc::clone(&self.internet_clock),
                ));
                if session.connect(&*self.dialer).await.is_ok() {
                    let _ = session.get_addr(&cancel).await;
                }
                session.dispose(DisconnectReason::Intentional);
                self.in_flight.write().await.remove(&addr);
            }

            let keep = self.sessions.read().await.keys().copied().collect();
            self.metrics.trim_oldest(self.config.max_addresses, &keep).await;

            let sessions: Vec<Arc<PeerSession>> = self.sessions.read().await.values().cloned().collect();
            let syncs = sessions.iter().map(|s| {
                let cancel = cancel.clone();
                let pool = self.clone();
                async move {
                    pool.syncing_count.fetch_add(1, Ordering::SeqCst);
                    let result = s.sync_headers(&cancel).await;
                    pool.syncing_count.fetch_sub(1, Ordering::SeqCst);
                    result
                }
            });
            futures::future::join_all(syncs).await;

            if self.syncing_count.load(Ordering::SeqCst) == 0 {
                let pruned = self.graph.write().await.prune_branches();
                if pruned > 0 {
                    info!(pruned, "pruned stale branches after health-monitor sync pass");
                }
            }
        }
    }
}

/// The threshold computed once at pool construction, exposed for
/// diagnostics/tests.
pub fn blacklist_threshold() -> f64 {
    metrics::compute_blacklist_threshold()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_threshold_is_between_zero_and_one() {
        let t = blacklist_threshold();
        assert!(t > 0.0 && t < 1.0);
    }
}
