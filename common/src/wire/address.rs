//! Network address records, as embedded in `version` and `addr` messages.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

/// Failure decoding a network address record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The buffer was shorter than the record requires.
    #[error("truncated network address")]
    Truncated,
}

/// A peer's advertised service bitfield, plus its address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkAddress {
    /// Service bits advertised by the peer.
    pub services: u64,
    /// The peer's IP address. IPv4 peers are carried on the wire in their
    /// `::ffff:a.b.c.d` mapped form but are canonicalized back to
    /// `IpAddr::V4` on decode, so this is always the same value a
    /// `SocketAddr` built from a DNS lookup or bootstrap source would have.
    pub ip: IpAddr,
    /// TCP port, host byte order.
    pub port: u16,
}

const ENCODED_LEN: usize = 26; // 8 services + 16 ip + 2 port

impl NetworkAddress {
    /// Encode without a timestamp prefix (used inside `version`).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENCODED_LEN);
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&ipv6_mapped_octets(self.ip));
        out.extend_from_slice(&self.port.to_be_bytes());
        out
    }

    /// Decode without a timestamp prefix.
    pub fn decode(buf: &[u8]) -> Result<(NetworkAddress, usize), AddressError> {
        if buf.len() < ENCODED_LEN {
            return Err(AddressError::Truncated);
        }
        let mut services_buf = [0u8; 8];
        services_buf.copy_from_slice(&buf[0..8]);
        let services = u64::from_le_bytes(services_buf);

        let mut ip_buf = [0u8; 16];
        ip_buf.copy_from_slice(&buf[8..24]);
        let v6 = Ipv6Addr::from(ip_buf);
        let ip = v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6));

        let mut port_buf = [0u8; 2];
        port_buf.copy_from_slice(&buf[24..26]);
        let port = u16::from_be_bytes(port_buf);

        Ok((NetworkAddress { services, ip, port }, ENCODED_LEN))
    }

    /// Encode with a 4-byte LE timestamp prefix (used inside `addr`).
    pub fn encode_timed(&self, timestamp: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + ENCODED_LEN);
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(&self.encode());
        out
    }

    /// Decode with a 4-byte LE timestamp prefix.
    pub fn decode_timed(buf: &[u8]) -> Result<((u32, NetworkAddress), usize), AddressError> {
        if buf.len() < 4 {
            return Err(AddressError::Truncated);
        }
        let mut ts_buf = [0u8; 4];
        ts_buf.copy_from_slice(&buf[0..4]);
        let timestamp = u32::from_le_bytes(ts_buf);
        let (addr, used) = NetworkAddress::decode(&buf[4..])?;
        Ok(((timestamp, addr), 4 + used))
    }
}

fn ipv6_mapped_octets(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => Ipv4Addr::to_ipv6_mapped(&v4).octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_is_encoded_as_mapped_ipv6() {
        let addr = NetworkAddress {
            services: 1,
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 8333,
        };
        let encoded = addr.encode();
        assert_eq!(&encoded[8..18], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&encoded[18..20], &[0xff, 0xff]);
        assert_eq!(&encoded[20..24], &[127, 0, 0, 1]);
    }

    #[test]
    fn round_trips_with_and_without_timestamp() {
        let addr = NetworkAddress {
            services: 0x01,
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port: 8333,
        };
        let (decoded, used) = NetworkAddress::decode(&addr.encode()).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(used, ENCODED_LEN);

        let ((ts, decoded), used) = NetworkAddress::decode_timed(&addr.encode_timed(42)).unwrap();
        assert_eq!(ts, 42);
        assert_eq!(decoded, addr);
        assert_eq!(used, 4 + ENCODED_LEN);
    }
}
