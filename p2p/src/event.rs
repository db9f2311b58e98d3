//! Notifications emitted by a [`crate::session::PeerSession`] and consumed
//! by [`crate::pool::PeerPool`] (and, for `NewChainTip`, by the
//! application). Modeled as a plain channel payload rather than a
//! callback-registration API, so the same session code runs unchanged
//! whether sessions live on one task or many.

use std::time::Duration;

use headers_common::{Hash, Height, PeerAddress};

use crate::session::DisconnectReason;

/// A notification raised by a peer session.
#[derive(Debug, Clone)]
pub enum Event {
    /// The longest chain advanced. The sole contractual output consumed by
    /// the application layer.
    NewChainTip {
        /// The peer whose sync loop produced this tip.
        peer: PeerAddress,
        /// New tip height.
        height: Height,
        /// New tip hash, hex-displayed.
        hash_hex: String,
    },
    /// A `headers` batch from this peer reached a known-invalid hash.
    InvalidBlocks {
        /// The offending peer.
        peer: PeerAddress,
        /// Hashes rejected because they are, or descend from, an
        /// invalid hash.
        hashes: Vec<Hash>,
    },
    /// This peer's sync loop stopped responding while visibly behind the
    /// graph's tip.
    OutOfSync {
        /// The lagging peer.
        peer: PeerAddress,
    },
    /// The peer advertised addresses, unsolicited (no `getaddr` pending).
    Addr {
        /// The announcing peer.
        peer: PeerAddress,
        /// Addresses received.
        addresses: Vec<PeerAddress>,
    },
    /// The peer announced new block hashes via `inv`.
    BlockHashes {
        /// The announcing peer.
        peer: PeerAddress,
        /// Hashes announced.
        hashes: Vec<Hash>,
    },
    /// The session reached the `Ready` state.
    Connected {
        /// The newly-ready peer.
        peer: PeerAddress,
    },
    /// A ping round-trip completed.
    Pong {
        /// The peer that replied.
        peer: PeerAddress,
        /// Measured round-trip time.
        latency: Duration,
    },
    /// The session was disposed.
    Disconnected {
        /// The peer that disconnected.
        peer: PeerAddress,
        /// Why, and how this should be classified for reputation.
        reason: DisconnectReason,
    },
}
