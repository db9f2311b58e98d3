//! Chain selection: magic, genesis, protocol version, and the built-in
//! invalid-block list, mirroring `nakamoto_common::bitcoin::Network` /
//! `nakamoto_node`'s per-chain `cfg.network` lookups.

use std::str::FromStr;

use crate::header::{BlockHeader, Bits, Hash};

/// A supported Bitcoin-family chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chain {
    /// Bitcoin SV mainnet.
    Bsv,
    /// Bitcoin Cash mainnet.
    Bch,
    /// Bitcoin mainnet.
    Btc,
}

/// Failure parsing a [`Chain`] from a configuration string.
#[derive(Debug, thiserror::Error)]
#[error("unknown chain: {0}")]
pub struct UnknownChain(String);

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bsv" => Ok(Chain::Bsv),
            "bch" => Ok(Chain::Bch),
            "btc" => Ok(Chain::Btc),
            other => Err(UnknownChain(other.to_string())),
        }
    }
}

impl Chain {
    /// 4-byte magic that opens every wire message on this chain.
    pub fn magic(&self) -> u32 {
        match self {
            Chain::Bsv => 0xe8f3_e1e3,
            Chain::Bch => 0xe8f3_e1e3,
            Chain::Btc => 0xd9b4_bef9,
        }
    }

    /// Default P2P TCP port.
    pub fn port(&self) -> u16 {
        8333
    }

    /// Protocol version number advertised in `version` messages.
    pub fn protocol_version(&self) -> i32 {
        70016
    }

    /// Default user-agent string.
    pub fn user_agent(&self) -> &'static str {
        "/headers-sync:0.1.0/"
    }

    /// The fixed genesis header for this chain.
    pub fn genesis(&self) -> BlockHeader {
        match self {
            Chain::Bsv | Chain::Bch | Chain::Btc => BlockHeader {
                version: 1,
                prev_blockhash: Hash([0; 32]),
                merkle_root: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
                    .parse()
                    .expect("valid genesis merkle root"),
                time: 1_231_006_505,
                bits: Bits(0x1d00_ffff),
                nonce: 2_083_236_893,
            },
        }
    }

    /// Hashes the chain operator treats as permanently invalid; headers
    /// descending from these are quarantined rather than accepted.
    pub fn built_in_invalid_blocks(&self) -> Vec<Hash> {
        Vec::new()
    }

    /// Hard-coded fallback peer addresses, used when bootstrap and DNS
    /// discovery both come up empty.
    pub fn seed_addresses(&self) -> Vec<(&'static str, u16)> {
        match self {
            Chain::Bsv => vec![("seed.bitcoinsv.io", 8333), ("seed.cascharia.com", 8333)],
            Chain::Bch => vec![("seed.bitcoinabc.org", 8333)],
            Chain::Btc => vec![("seed.bitcoin.sipa.be", 8333)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_hash_is_the_well_known_constant() {
        let genesis = Chain::Bsv.genesis();
        assert_eq!(
            genesis.hash().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }
}
