//! A canonicalized `(ip, port)` key, used anywhere peers are indexed by
//! address: the metrics store, the session maps, the rating index.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A peer's network address, canonicalized to a stable textual key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress {
    /// The peer's IP address.
    pub ip: IpAddr,
    /// The peer's TCP port.
    pub port: u16,
}

impl PeerAddress {
    /// Construct from parts.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        PeerAddress { ip, port }
    }

    /// The canonical textual key for this address, suitable for use as a
    /// map key in the persistent metrics store.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(v4) => write!(f, "{v4}:{}", self.port),
            IpAddr::V6(v6) => write!(f, "[{v6}]:{}", self.port),
        }
    }
}

/// Failure parsing a [`PeerAddress`] from its textual key.
#[derive(Debug, thiserror::Error)]
#[error("invalid peer address: {0}")]
pub struct PeerAddressParseError(String);

impl FromStr for PeerAddress {
    type Err = PeerAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sock: std::net::SocketAddr = s
            .parse()
            .map_err(|_| PeerAddressParseError(s.to_string()))?;
        Ok(PeerAddress::new(sock.ip(), sock.port()))
    }
}

impl From<std::net::SocketAddr> for PeerAddress {
    fn from(sock: std::net::SocketAddr) -> Self {
        PeerAddress::new(sock.ip(), sock.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn ipv4_key_round_trips() {
        let addr = PeerAddress::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8333);
        let key = addr.key();
        assert_eq!(key, "127.0.0.1:8333");
        assert_eq!(key.parse::<PeerAddress>().unwrap(), addr);
    }
}
