//! Per-peer session: one instance per TCP connection. Drives the
//! handshake, frames and dispatches inbound messages, correlates
//! requests with their responses, keeps the connection alive with pings,
//! and runs the header synchronization loop.
//!
//! Grounded in the teacher's `Peer`/handshake/keepalive vocabulary
//! (`p2p/src/fsm.rs`), generalized from that reactor's synchronous,
//! callback-driven model onto one `tokio` task per session: `connect`
//! dials and performs the handshake, then spawns a background task that
//! owns the read half and keeps dispatching for the life of the
//! connection, while the session's public methods (`ping`, `get_headers`,
//! `get_addr`, `sync_headers`) send on the write half and await responses
//! through the correlators that background task resolves.

pub mod correlator;
pub mod state;
mod sync;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use headers_chain::HeaderGraph;
use headers_common::wire::{
    decode_addr, decode_getheaders as _decode_getheaders, decode_headers, decode_inv,
    decode_ping_pong, deframe, encode_addr as _encode_addr, encode_getheaders, encode_headers as _encode_headers,
    encode_ping_pong, frame, Deframed, InvType, NetworkAddress, VersionMessage,
};
use headers_common::{BlockHeader, Hash, PeerAddress};

use crate::error::SessionError;
use crate::event::Event;
use crate::transport::{TcpDialer, Transport};

pub use correlator::CorrelatorError;
pub use state::{DisconnectReason, SessionPhase};
pub use sync::SyncOutcome;

/// The lowest protocol version this client accepts from a peer: the
/// version that introduced `getheaders`/`headers`, below which header
/// sync itself is impossible.
const MIN_PROTOCOL_VERSION: i32 = 31800;

/// Fixed per-request timeouts, a subset of [`crate::config::PoolConfig`]
/// that a session needs independent of the pool that owns it.
#[derive(Clone, Debug)]
pub struct SessionTimeouts {
    /// TCP connect timeout.
    pub connect: Duration,
    /// Handshake completion timeout.
    pub handshake: Duration,
    /// `ping`/`getheaders` timeout.
    pub request: Duration,
    /// `getaddr` timeout (legitimately much longer).
    pub getaddr: Duration,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        SessionTimeouts {
            connect: Duration::from_millis(8000),
            handshake: Duration::from_millis(8000),
            request: Duration::from_millis(8000),
            getaddr: Duration::from_millis(120_000),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// One peer connection's full protocol state.
pub struct PeerSession {
    /// The remote address this session is, or was, connected to.
    pub addr: PeerAddress,
    magic: u32,
    protocol_version: i32,
    user_agent: String,

    graph: Arc<RwLock<HeaderGraph>>,
    events: mpsc::UnboundedSender<Event>,
    timeouts: SessionTimeouts,

    phase: Mutex<SessionPhase>,
    cancel: CancellationToken,

    writer: tokio::sync::Mutex<Option<WriteHalf<Box<dyn Transport>>>>,

    handshake: correlator::SingleSlot<()>,
    getheaders: correlator::SingleSlot<Vec<BlockHeader>>,
    getaddr: correlator::SingleSlot<Vec<PeerAddress>>,
    pings: correlator::PingSlots,

    sync_guard: tokio::sync::Mutex<()>,
    verack_sent: AtomicBool,

    starting_tip_hash: Mutex<Option<Hash>>,
    last_peer_tip_hash: Mutex<Option<Hash>>,
    last_traffic: Mutex<Instant>,
    last_ping_at: Mutex<Option<Instant>>,

    /// The process-wide "last known internet connection time", shared
    /// across every session the owning pool runs (spec §4.4.4): any
    /// session's inbound traffic counts as evidence the link is up, which
    /// lets siblings skip a redundant keepalive ping.
    internet_clock: Arc<AtomicI64>,
}

impl PeerSession {
    /// Construct a session in [`SessionPhase::Idle`], not yet connected.
    pub fn new(
        addr: PeerAddress,
        magic: u32,
        protocol_version: i32,
        user_agent: String,
        graph: Arc<RwLock<HeaderGraph>>,
        events: mpsc::UnboundedSender<Event>,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self::with_internet_clock(
            addr,
            magic,
            protocol_version,
            user_agent,
            graph,
            events,
            timeouts,
            Arc::new(AtomicI64::new(0)),
        )
    }

    /// As [`PeerSession::new`], but sharing a pool-wide "last known
    /// internet connection time" clock with sibling sessions, so any
    /// session's traffic can stand in for this one's own keepalive
    /// evidence (spec §4.4.4). The pool constructs one clock and passes it
    /// to every session it spawns.
    pub fn with_internet_clock(
        addr: PeerAddress,
        magic: u32,
        protocol_version: i32,
        user_agent: String,
        graph: Arc<RwLock<HeaderGraph>>,
        events: mpsc::UnboundedSender<Event>,
        timeouts: SessionTimeouts,
        internet_clock: Arc<AtomicI64>,
    ) -> Self {
        PeerSession {
            addr,
            magic,
            protocol_version,
            user_agent,
            graph,
            events,
            timeouts,
            phase: Mutex::new(SessionPhase::Idle),
            cancel: CancellationToken::new(),
            writer: tokio::sync::Mutex::new(None),
            handshake: correlator::SingleSlot::default(),
            getheaders: correlator::SingleSlot::default(),
            getaddr: correlator::SingleSlot::default(),
            pings: correlator::PingSlots::default(),
            sync_guard: tokio::sync::Mutex::new(()),
            verack_sent: AtomicBool::new(false),
            starting_tip_hash: Mutex::new(None),
            last_peer_tip_hash: Mutex::new(None),
            last_traffic: Mutex::new(Instant::now()),
            last_ping_at: Mutex::new(None),
            internet_clock,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().expect("phase mutex poisoned")
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().expect("phase mutex poisoned") = phase;
    }

    /// The session's cancellation token, for the pool to abort this
    /// session alongside its sibling workers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn touch_traffic(&self) {
        *self.last_traffic.lock().expect("traffic mutex poisoned") = Instant::now();
        self.internet_clock.store(unix_time_ms(), Ordering::Relaxed);
    }

    /// Seconds since the last inbound byte was observed on this session.
    pub fn idle_for(&self) -> Duration {
        self.last_traffic.lock().expect("traffic mutex poisoned").elapsed()
    }

    /// Whether this session has pinged within the last `window`.
    pub fn pinged_within(&self, window: Duration) -> bool {
        self.last_ping_at
            .lock()
            .expect("ping-at mutex poisoned")
            .map(|t| t.elapsed() < window)
            .unwrap_or(false)
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    /// Dial the peer, perform the handshake, and — on success — spawn the
    /// background read-dispatch task that keeps running until disposal.
    /// Resolves once [`SessionPhase::Ready`] is reached or the handshake
    /// fails/times out.
    #[instrument(skip(self, dialer), fields(addr = %self.addr))]
    pub async fn connect(self: &Arc<Self>, dialer: &dyn TcpDialer) -> Result<(), SessionError> {
        self.set_phase(SessionPhase::Connecting);
        let transport = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.dispose(DisconnectReason::Intentional);
                return Err(SessionError::Disposed);
            }
            result = dialer.dial(self.addr, self.timeouts.connect) => result,
        };
        let transport = match transport {
            Ok(t) => t,
            Err(e) => {
                self.dispose(DisconnectReason::UnintentionalBeforeConnect);
                return Err(SessionError::Connect(e));
            }
        };

        self.set_phase(SessionPhase::HandshakePending);
        *self.starting_tip_hash.lock().expect("tip mutex poisoned") =
            Some(self.graph.read().await.tip().hash);

        let (reader, writer) = tokio::io::split(transport);
        *self.writer.lock().await = Some(writer);

        if let Err(e) = self.send_version().await {
            self.dispose(DisconnectReason::UnintentionalBeforeConnect);
            return Err(e);
        }

        let handshake_rx = self
            .handshake
            .register(true)
            .expect("handshake slot is never occupied before connect");

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let result = session.read_loop(reader).await;
            session.dispose_from_loop_result(result);
        });

        match tokio::time::timeout(self.timeouts.handshake, handshake_rx).await {
            Ok(Ok(Ok(()))) => {
                let session = Arc::clone(self);
                let cancel = self.cancel.clone();
                tokio::spawn(async move { session.keepalive_loop(cancel).await });
                Ok(())
            }
            _ => {
                self.handshake.fail(CorrelatorError::Timeout);
                self.dispose(DisconnectReason::UnintentionalBeforeConnect);
                Err(SessionError::HandshakeTimeout)
            }
        }
    }

    /// Keepalive ping loop, spec §4.4.4: ticks every `ping_interval`, and
    /// skips issuing a ping when another session has recently proven the
    /// link is up and this one has itself pinged inside the last 10
    /// minutes — active sessions double as liveness evidence for idle
    /// ones, cutting wasteful traffic.
    async fn keepalive_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.timeouts.ping_interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.phase() != SessionPhase::Ready {
                return;
            }

            let recent_internet_evidence = unix_time_ms() - self.internet_clock.load(Ordering::Relaxed) < 1000;
            if recent_internet_evidence && self.pinged_within(Duration::from_secs(10 * 60)) {
                continue;
            }

            let _ = self.ping(&cancel).await;
        }
    }

    async fn send_version(&self) -> Result<(), SessionError> {
        let recv = NetworkAddress {
            services: 0,
            ip: self.addr.ip,
            port: self.addr.port,
        };
        let from = NetworkAddress {
            services: 0,
            ip: std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            port: 0,
        };
        let msg = VersionMessage {
            version: self.protocol_version,
            services: 0,
            timestamp: unix_time_seconds(),
            addr_recv: recv,
            addr_from: from,
            nonce: fastrand::u64(..),
            user_agent: self.user_agent.clone(),
            start_height: self.graph.read().await.tip().height as i32,
            relay: false,
        };
        self.write_frame("version", &msg.encode()).await
    }

    async fn write_frame(&self, command: &str, payload: &[u8]) -> Result<(), SessionError> {
        let framed = frame(self.magic, command, payload);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Disposed)?;
        writer.write_all(&framed).await.map_err(SessionError::Io)
    }

    /// Read and dispatch inbound frames until the transport closes, the
    /// cancellation token fires, or a protocol violation occurs. Owns the
    /// read half for the life of the connection; runs as a background
    /// task spawned by [`connect`](Self::connect).
    async fn read_loop(self: &Arc<Self>, mut reader: ReadHalf<Box<dyn Transport>>) -> Result<(), SessionError> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut pending = Vec::new();

        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = reader.read(&mut buf) => read,
            };
            let n = read.map_err(SessionError::Io)?;
            if n == 0 {
                return Err(SessionError::Closed);
            }
            self.touch_traffic();
            pending.extend_from_slice(&buf[..n]);

            let Deframed {
                messages,
                remaining,
                errors,
            } = deframe(&pending, self.magic);
            pending = remaining;

            for (command, reason) in errors {
                warn!(command = %command, reason = %reason, "checksum mismatch, skipping frame");
            }

            for (command, payload) in messages {
                self.dispatch(&command, &payload).await?;
            }
        }
    }

    async fn dispatch(&self, command: &str, payload: &[u8]) -> Result<(), SessionError> {
        match command {
            "version" => self.on_version(payload).await,
            "verack" => self.on_verack(),
            "ping" => self.on_ping(payload).await,
            "pong" => self.on_pong(payload),
            "headers" => self.on_headers(payload),
            "getheaders" => Ok(()), // we never serve inbound sync requests
            "addr" => self.on_addr(payload),
            "inv" => self.on_inv(payload),
            _ => Ok(()),
        }
    }

    async fn on_version(&self, payload: &[u8]) -> Result<(), SessionError> {
        if self.phase() != SessionPhase::HandshakePending {
            return Err(SessionError::HandshakeViolation("version after handshake"));
        }
        let version = VersionMessage::decode(payload)?;
        if version.version < MIN_PROTOCOL_VERSION {
            return Err(SessionError::ProtocolTooOld(version.version));
        }
        self.write_frame("verack", &[]).await?;
        self.verack_sent.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_verack(&self) -> Result<(), SessionError> {
        if self.phase() != SessionPhase::HandshakePending {
            return Err(SessionError::HandshakeViolation("verack after handshake"));
        }
        self.set_phase(SessionPhase::Ready);
        self.handshake.resolve(());
        self.emit(Event::Connected { peer: self.addr });
        Ok(())
    }

    async fn on_ping(&self, payload: &[u8]) -> Result<(), SessionError> {
        let nonce = decode_ping_pong(payload, "ping")?;
        self.write_frame("pong", &encode_ping_pong(nonce)).await
    }

    fn on_pong(&self, payload: &[u8]) -> Result<(), SessionError> {
        let nonce = decode_ping_pong(payload, "pong")?;
        if let Some(latency) = self.pings.resolve(nonce) {
            self.emit(Event::Pong { peer: self.addr, latency });
        }
        Ok(())
    }

    fn on_headers(&self, payload: &[u8]) -> Result<(), SessionError> {
        match decode_headers(payload, false) {
            Ok(headers) => {
                self.getheaders.resolve(headers);
                Ok(())
            }
            Err(e) => {
                self.getheaders.fail(CorrelatorError::Rejected);
                Err(SessionError::Malformed(e))
            }
        }
    }

    fn on_addr(&self, payload: &[u8]) -> Result<(), SessionError> {
        let entries = decode_addr(payload)?;
        let addresses: Vec<PeerAddress> = entries
            .into_iter()
            .map(|(_, addr)| PeerAddress::new(addr.ip, addr.port))
            .collect();
        if self.getaddr.is_pending() {
            self.getaddr.resolve(addresses);
        } else {
            self.emit(Event::Addr {
                peer: self.addr,
                addresses,
            });
        }
        Ok(())
    }

    fn on_inv(&self, payload: &[u8]) -> Result<(), SessionError> {
        let items = decode_inv(payload)?;
        let hashes: Vec<Hash> = items
            .into_iter()
            .filter(|i| matches!(i.kind, InvType::Block))
            .map(|i| i.hash)
            .collect();
        if !hashes.is_empty() {
            self.emit(Event::BlockHashes {
                peer: self.addr,
                hashes,
            });
        }
        Ok(())
    }

    /// Issue a ping and await its pong, honoring `token` for cancellation.
    /// Spec §4.4.4: skipped by the keepalive tick itself when there is
    /// recent traffic and a recent ping, but always available on demand
    /// (e.g. for the pool's liveness accounting).
    pub async fn ping(&self, token: &CancellationToken) -> Result<Duration, SessionError> {
        if self.phase() == SessionPhase::Disposed {
            return Err(SessionError::Disposed);
        }
        let nonce = fastrand::u64(..);
        let rx = self.pings.register(nonce);
        self.write_frame("ping", &encode_ping_pong(nonce)).await?;
        *self.last_ping_at.lock().expect("ping-at mutex poisoned") = Some(Instant::now());

        tokio::select! {
            _ = token.cancelled() => {
                self.pings.fail_one(nonce, CorrelatorError::Cancelled);
                Err(SessionError::Disposed)
            }
            result = tokio::time::timeout(self.timeouts.request, rx) => {
                match result {
                    Ok(Ok(Ok(rtt))) => Ok(rtt),
                    _ => {
                        self.pings.fail_one(nonce, CorrelatorError::Timeout);
                        Err(SessionError::RequestTimeout)
                    }
                }
            }
        }
    }

    /// Request headers starting from `locators`, stopping at `stop` (the
    /// zero hash requests as many as the peer will give).
    pub async fn get_headers(
        &self,
        locators: Vec<Hash>,
        stop: Hash,
        token: &CancellationToken,
    ) -> Result<Vec<BlockHeader>, SessionError> {
        let Some(rx) = self.getheaders.register(false) else {
            return Err(SessionError::RequestTimeout);
        };
        self.write_frame(
            "getheaders",
            &encode_getheaders(self.protocol_version, &locators, stop),
        )
        .await?;

        tokio::select! {
            _ = token.cancelled() => {
                self.getheaders.fail(CorrelatorError::Cancelled);
                Err(SessionError::Disposed)
            }
            result = tokio::time::timeout(self.timeouts.request, rx) => {
                match result {
                    Ok(Ok(Ok(headers))) => Ok(headers),
                    _ => {
                        self.getheaders.fail(CorrelatorError::Timeout);
                        Err(SessionError::RequestTimeout)
                    }
                }
            }
        }
    }

    /// Request the peer's known address list.
    pub async fn get_addr(&self, token: &CancellationToken) -> Result<Vec<PeerAddress>, SessionError> {
        let Some(rx) = self.getaddr.register(true) else {
            unreachable!("getaddr coalesces and therefore always yields a receiver");
        };
        self.write_frame("getaddr", &[]).await?;

        tokio::select! {
            _ = token.cancelled() => {
                self.getaddr.fail(CorrelatorError::Cancelled);
                Err(SessionError::Disposed)
            }
            result = tokio::time::timeout(self.timeouts.getaddr, rx) => {
                match result {
                    Ok(Ok(Ok(addrs))) => Ok(addrs),
                    _ => {
                        self.getaddr.fail(CorrelatorError::Timeout);
                        Err(SessionError::RequestTimeout)
                    }
                }
            }
        }
    }

    /// Probe every known invalid hash for acceptance by this peer (spec
    /// §4.4.6): if it ever replies with a header descending directly from
    /// one, that's proof the peer is serving an invalid chain.
    pub async fn on_valid_chain(
        &self,
        invalid_hashes: &[Hash],
        token: &CancellationToken,
    ) -> Result<bool, SessionError> {
        for &invalid in invalid_hashes {
            let headers = self
                .get_headers(vec![invalid], Hash::default(), token)
                .await?;
            if headers.iter().any(|h| h.prev_blockhash == invalid) {
                self.emit(Event::InvalidBlocks {
                    peer: self.addr,
                    hashes: vec![invalid],
                });
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Dispose the session: mark it terminal, fail every outstanding
    /// correlator, and classify the disconnect for the pool.
    pub fn dispose(&self, reason: DisconnectReason) {
        let previous = self.phase();
        if previous == SessionPhase::Disposed {
            return;
        }
        self.set_phase(SessionPhase::Disposed);
        self.cancel.cancel();

        self.handshake.fail(CorrelatorError::Disposed);
        self.getheaders.fail(CorrelatorError::Disposed);
        self.getaddr.fail(CorrelatorError::Disposed);
        self.pings.fail_all(CorrelatorError::Disposed);

        let reason = match reason {
            DisconnectReason::Intentional => DisconnectReason::Intentional,
            _ => DisconnectReason::classify(previous.reached_ready()),
        };
        self.emit(Event::Disconnected {
            peer: self.addr,
            reason,
        });
    }

    fn dispose_from_loop_result(&self, result: Result<(), SessionError>) {
        match &result {
            Ok(()) => self.dispose(DisconnectReason::Intentional),
            Err(SessionError::Disposed) => {}
            Err(_) => {
                let reached_ready = self.phase().reached_ready();
                self.dispose(DisconnectReason::classify(reached_ready));
            }
        }
    }
}

fn unix_time_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn unix_time_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
