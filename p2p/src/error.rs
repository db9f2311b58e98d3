//! Error types for sessions and the pool.

use thiserror::Error;

use headers_common::wire::MalformedPayload;

/// Failure in a single peer session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The TCP connection could not be established.
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    /// The socket errored while reading or writing.
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
    /// The peer closed the connection.
    #[error("peer closed the connection")]
    Closed,
    /// The handshake did not complete before its timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The peer sent `verack`/`version` out of order, or a second
    /// `version` after the handshake completed.
    #[error("handshake protocol violation: {0}")]
    HandshakeViolation(&'static str),
    /// A pending request (other than the handshake) timed out.
    #[error("request timed out")]
    RequestTimeout,
    /// A message's payload failed to decode.
    #[error("malformed payload: {0}")]
    Malformed(#[from] MalformedPayload),
    /// The peer announced a header batch that descends from, or is, a
    /// known-invalid hash.
    #[error("peer served invalid chain")]
    InvalidChain,
    /// The peer announced a protocol version below the minimum accepted.
    #[error("peer protocol version {0} is too old")]
    ProtocolTooOld(i32),
    /// A `headers` batch exceeded the maximum sane count, or violated
    /// monotonic-extension/no-future-timestamp checks.
    #[error("pathological headers batch: {0}")]
    PathologicalBatch(&'static str),
    /// The session was disposed while the operation was in flight.
    #[error("session disposed")]
    Disposed,
}

/// Failure in the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The bootstrap source could not be reached or returned no usable
    /// addresses.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
}
