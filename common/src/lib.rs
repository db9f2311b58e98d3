//! Wire format, block header and chain-parameter primitives shared by the
//! header-sync client crates. Analogous in spirit to `nakamoto-common`: the
//! headers-only subset of it, generalized across Bitcoin-family chains
//! rather than tied to a single vendored `bitcoin` crate.

pub mod header;
pub mod network;
pub mod peer_address;
pub mod uint256;
pub mod wire;

pub use header::{BlockHeader, Bits, Hash, HeaderError, Target, Work, HEADER_SIZE};
pub use network::Chain;
pub use peer_address::PeerAddress;
pub use uint256::U256;

/// A header's position in the longest chain, with genesis at height zero.
pub type Height = u64;

/// A Unix timestamp in milliseconds, used throughout peer metrics.
pub type TimestampMs = i64;
