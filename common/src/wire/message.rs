//! Payload encoders/decoders for the subset of the wire protocol this
//! client speaks: `version`, `verack`, `ping`/`pong`, `getheaders`,
//! `headers`, `getaddr`, `addr`, `inv`.

use thiserror::Error;

use crate::header::{BlockHeader, Hash, HeaderError, HEADER_SIZE};
use crate::wire::address::{AddressError, NetworkAddress};
use crate::wire::varint;

/// A typed failure decoding a message payload, carrying the command it was
/// found in so the caller can report it without disconnecting unless a
/// correlated request is waiting on it.
#[derive(Debug, Error)]
#[error("malformed {command} payload: {reason}")]
pub struct MalformedPayload {
    /// The wire command the offending payload arrived under.
    pub command: String,
    /// Human-readable reason, for logs.
    pub reason: String,
}

impl MalformedPayload {
    fn new(command: &str, reason: impl Into<String>) -> Self {
        MalformedPayload {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

fn need(buf: &[u8], len: usize, command: &str, what: &str) -> Result<(), MalformedPayload> {
    if buf.len() < len {
        Err(MalformedPayload::new(command, format!("truncated {what}")))
    } else {
        Ok(())
    }
}

/// The `version` handshake message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionMessage {
    /// Protocol version.
    pub version: i32,
    /// Service bits offered by the sender.
    pub services: u64,
    /// Sender's clock, seconds since epoch.
    pub timestamp: i64,
    /// The receiving peer's address, as seen by the sender.
    pub addr_recv: NetworkAddress,
    /// The sender's own address.
    pub addr_from: NetworkAddress,
    /// Random nonce, used to detect self-connections.
    pub nonce: u64,
    /// Free-form client identification string.
    pub user_agent: String,
    /// The sender's current chain height.
    pub start_height: i32,
    /// Whether the sender wants unfiltered transaction relay.
    pub relay: bool,
}

impl VersionMessage {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.addr_recv.encode());
        out.extend_from_slice(&self.addr_from.encode());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&varint::encode(self.user_agent.len() as u64));
        out.extend_from_slice(self.user_agent.as_bytes());
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.push(self.relay as u8);
        out
    }

    /// Decode from wire bytes.
    pub fn decode(buf: &[u8]) -> Result<VersionMessage, MalformedPayload> {
        const CMD: &str = "version";
        need(buf, 4 + 8 + 8, CMD, "fixed header")?;
        let mut cursor = 0usize;

        let version = i32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        let services = u64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let timestamp = i64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;

        let (addr_recv, used) = NetworkAddress::decode(&buf[cursor..])
            .map_err(|e| address_err(CMD, e))?;
        cursor += used;
        let (addr_from, used) = NetworkAddress::decode(&buf[cursor..])
            .map_err(|e| address_err(CMD, e))?;
        cursor += used;

        need(buf, cursor + 8, CMD, "nonce")?;
        let nonce = u64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;

        let (len, used) = varint::decode(&buf[cursor..])
            .map_err(|_| MalformedPayload::new(CMD, "truncated user agent length"))?;
        cursor += used;
        let len = len as usize;
        need(buf, cursor + len, CMD, "user agent bytes")?;
        let user_agent = String::from_utf8_lossy(&buf[cursor..cursor + len]).into_owned();
        cursor += len;

        need(buf, cursor + 4, CMD, "start height")?;
        let start_height = i32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;

        let relay = buf.get(cursor).copied().unwrap_or(0) != 0;

        Ok(VersionMessage {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

fn address_err(command: &str, e: AddressError) -> MalformedPayload {
    MalformedPayload::new(command, e.to_string())
}

/// Encode a `ping`/`pong` payload (an 8-byte nonce).
pub fn encode_ping_pong(nonce: u64) -> Vec<u8> {
    nonce.to_le_bytes().to_vec()
}

/// Decode a `ping`/`pong` payload.
pub fn decode_ping_pong(buf: &[u8], command: &str) -> Result<u64, MalformedPayload> {
    need(buf, 8, command, "nonce")?;
    Ok(u64::from_le_bytes(buf[0..8].try_into().unwrap()))
}

/// Encode a `getheaders` payload.
pub fn encode_getheaders(version: i32, locators: &[Hash], stop: Hash) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&varint::encode(locators.len() as u64));
    for h in locators {
        out.extend_from_slice(&h.0);
    }
    out.extend_from_slice(&stop.0);
    out
}

/// Decoded `getheaders` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeaders {
    /// Sender's protocol version.
    pub version: i32,
    /// Block locator hashes, most recent first.
    pub locators: Vec<Hash>,
    /// Hash to stop at, or the zero hash for "as many as possible".
    pub stop: Hash,
}

/// Decode a `getheaders` payload.
pub fn decode_getheaders(buf: &[u8]) -> Result<GetHeaders, MalformedPayload> {
    const CMD: &str = "getheaders";
    need(buf, 4, CMD, "version")?;
    let version = i32::from_le_bytes(buf[0..4].try_into().unwrap());
    let mut cursor = 4;

    let (count, used) =
        varint::decode(&buf[cursor..]).map_err(|_| MalformedPayload::new(CMD, "truncated count"))?;
    cursor += used;

    let mut locators = Vec::with_capacity(count as usize);
    for _ in 0..count {
        need(buf, cursor + 32, CMD, "locator hash")?;
        let mut h = [0u8; 32];
        h.copy_from_slice(&buf[cursor..cursor + 32]);
        locators.push(Hash(h));
        cursor += 32;
    }

    need(buf, cursor + 32, CMD, "stop hash")?;
    let mut stop = [0u8; 32];
    stop.copy_from_slice(&buf[cursor..cursor + 32]);

    Ok(GetHeaders {
        version,
        locators,
        stop: Hash(stop),
    })
}

/// Encode a `headers` payload. Each header is followed by a zero
/// transaction-count varint, matching the wire format (the count is never
/// meaningful for a headers-only client and is ignored on decode).
pub fn encode_headers(headers: &[BlockHeader]) -> Vec<u8> {
    let mut out = varint::encode(headers.len() as u64);
    for header in headers {
        out.extend_from_slice(&header.serialize());
        out.extend_from_slice(&varint::encode(0));
    }
    out
}

/// Decode a `headers` payload. `skip_pow` is forwarded to
/// [`BlockHeader::parse`] for test use; normal operation always verifies
/// proof-of-work at this boundary.
pub fn decode_headers(buf: &[u8], skip_pow: bool) -> Result<Vec<BlockHeader>, MalformedPayload> {
    const CMD: &str = "headers";
    let (count, used) =
        varint::decode(buf).map_err(|_| MalformedPayload::new(CMD, "truncated count"))?;
    let mut cursor = used;
    let mut headers = Vec::with_capacity(count as usize);

    for _ in 0..count {
        need(buf, cursor + HEADER_SIZE, CMD, "header bytes")?;
        let header = BlockHeader::parse(&buf[cursor..cursor + HEADER_SIZE], skip_pow)
            .map_err(|e: HeaderError| MalformedPayload::new(CMD, e.to_string()))?;
        cursor += HEADER_SIZE;

        let (_tx_count, used) = varint::decode(&buf[cursor..])
            .map_err(|_| MalformedPayload::new(CMD, "truncated tx count"))?;
        cursor += used;

        headers.push(header);
    }

    Ok(headers)
}

/// An inventory vector's type tag. Only blocks are meaningful to this
/// client; everything else is decoded but ignored by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvType {
    /// An ordinary (non-witness) transaction.
    Tx,
    /// A block.
    Block,
    /// Any other/unrecognized type tag.
    Other(u32),
}

impl From<u32> for InvType {
    fn from(n: u32) -> Self {
        match n {
            1 => InvType::Tx,
            2 => InvType::Block,
            other => InvType::Other(other),
        }
    }
}

/// One inventory announcement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Inventory {
    /// The kind of object being announced.
    pub kind: InvType,
    /// The object's hash.
    pub hash: Hash,
}

/// Decode an `inv` payload.
pub fn decode_inv(buf: &[u8]) -> Result<Vec<Inventory>, MalformedPayload> {
    const CMD: &str = "inv";
    let (count, used) =
        varint::decode(buf).map_err(|_| MalformedPayload::new(CMD, "truncated count"))?;
    let mut cursor = used;
    let mut out = Vec::with_capacity(count as usize);

    for _ in 0..count {
        need(buf, cursor + 36, CMD, "inventory vector")?;
        let mut ty = [0u8; 4];
        ty.copy_from_slice(&buf[cursor..cursor + 4]);
        let kind = InvType::from(u32::from_le_bytes(ty));
        cursor += 4;

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&buf[cursor..cursor + 32]);
        cursor += 32;

        out.push(Inventory { kind, hash: Hash(hash) });
    }

    Ok(out)
}

/// Encode an `inv` payload.
pub fn encode_inv(items: &[Inventory]) -> Vec<u8> {
    let mut out = varint::encode(items.len() as u64);
    for item in items {
        let tag: u32 = match item.kind {
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::Other(n) => n,
        };
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&item.hash.0);
    }
    out
}

/// Decode an `addr` payload into `(timestamp, address)` pairs.
pub fn decode_addr(buf: &[u8]) -> Result<Vec<(u32, NetworkAddress)>, MalformedPayload> {
    const CMD: &str = "addr";
    let (count, used) =
        varint::decode(buf).map_err(|_| MalformedPayload::new(CMD, "truncated count"))?;
    let mut cursor = used;
    let mut out = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let (entry, consumed) =
            NetworkAddress::decode_timed(&buf[cursor..]).map_err(|e| address_err(CMD, e))?;
        out.push(entry);
        cursor += consumed;
    }

    Ok(out)
}

/// Encode an `addr` payload.
pub fn encode_addr(entries: &[(u32, NetworkAddress)]) -> Vec<u8> {
    let mut out = varint::encode(entries.len() as u64);
    for (ts, addr) in entries {
        out.extend_from_slice(&addr.encode_timed(*ts));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> NetworkAddress {
        NetworkAddress {
            services: 1,
            ip: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            port: 8333,
        }
    }

    #[test]
    fn version_message_round_trips() {
        let msg = VersionMessage {
            version: 70016,
            services: 1,
            timestamp: 1_700_000_000,
            addr_recv: addr(),
            addr_from: addr(),
            nonce: 0xdead_beef_cafe_0001,
            user_agent: "/headers-sync:0.1.0/".to_string(),
            start_height: 12345,
            relay: true,
        };
        let decoded = VersionMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn getheaders_round_trips() {
        let locators = vec![Hash([1; 32]), Hash([2; 32])];
        let encoded = encode_getheaders(70016, &locators, Hash([0; 32]));
        let decoded = decode_getheaders(&encoded).unwrap();
        assert_eq!(decoded.version, 70016);
        assert_eq!(decoded.locators, locators);
        assert_eq!(decoded.stop, Hash([0; 32]));
    }

    #[test]
    fn inv_round_trips_block_type() {
        let items = vec![Inventory { kind: InvType::Block, hash: Hash([7; 32]) }];
        let decoded = decode_inv(&encode_inv(&items)).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn ping_pong_round_trips() {
        let encoded = encode_ping_pong(0x1122_3344_5566_7788);
        assert_eq!(decode_ping_pong(&encoded, "ping").unwrap(), 0x1122_3344_5566_7788);
    }
}
