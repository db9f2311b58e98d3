//! The 80-byte block header: parsing, hashing, and proof-of-work derivation.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::uint256::U256;

/// Size in bytes of a serialized block header.
pub const HEADER_SIZE: usize = 80;

/// A double-SHA-256 block hash, stored in internal (little-endian) byte
/// order. Its `Display`/`FromStr` implementations use the conventional
/// reversed-byte (big-endian) hex form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Interpret the hash as a big unsigned integer, for comparison against
    /// a [`Target`].
    pub fn as_uint256(&self) -> U256 {
        let mut be = self.0;
        be.reverse();
        U256::from_be_bytes(&be)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        write!(f, "{}", hex::encode(reversed))
    }
}

/// Failure parsing a hash from its hex display form.
#[derive(Debug, Error)]
#[error("invalid hash hex: {0}")]
pub struct HashParseError(String);

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| HashParseError(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(HashParseError(format!("expected 32 bytes, got {}", bytes.len())));
        }
        let mut internal = [0u8; 32];
        internal.copy_from_slice(&bytes);
        internal.reverse();
        Ok(Hash(internal))
    }
}

/// Compact proof-of-work target encoding ("bits"): big-endian
/// `exponent:coefficient[3]`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Bits(pub u32);

/// A decoded proof-of-work target: headers whose hash (as an integer) is
/// greater than this are invalid.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Target(pub U256);

/// Cumulative proof-of-work, in expected-hashes units.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Work(pub U256);

impl std::ops::Add for Work {
    type Output = Work;
    fn add(self, rhs: Work) -> Work {
        Work(self.0 + rhs.0)
    }
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Bits {
    /// Decode into a [`Target`].
    ///
    /// `bits` is parsed as `exponent:coefficient[3]` (big-endian): the top
    /// byte is the exponent, the remaining three are the coefficient.
    /// `target = coefficient * 2^(8*(exponent-3))`.
    pub fn target(&self) -> Target {
        let exponent = (self.0 >> 24) as i32;
        let coefficient = (self.0 & 0x007f_ffff) as u64;
        let negative = self.0 & 0x0080_0000 != 0;

        if negative || coefficient == 0 {
            return Target(U256::ZERO);
        }

        let shift = 8 * (exponent - 3);
        let coeff = U256::from_u64(coefficient);
        let target = if shift >= 0 {
            if shift >= 256 {
                U256::ZERO
            } else {
                coeff << (shift as u32)
            }
        } else {
            // A negative shift only arises from malformed bits; there is no
            // valid proof-of-work target with exponent < 3 in practice.
            U256::ZERO
        };
        Target(target)
    }
}

impl Target {
    /// Derive the expected work required to produce a header meeting this
    /// target: `work = ~target / (target + 1) + 1`, the same identity
    /// `bitcoin::Uint256::work` uses to avoid needing a 257-bit dividend.
    pub fn work(&self) -> Result<Work, HeaderError> {
        if self.0.is_zero() {
            return Err(HeaderError::ZeroTarget);
        }
        let not_target = self.0.not();
        let denom = self.0 + U256::from_u64(1);
        let (quotient, _) = not_target.div_rem(denom);
        Ok(Work(quotient + U256::from_u64(1)))
    }
}

/// A parsed 80-byte block header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockHeader {
    /// Block version.
    pub version: i32,
    /// Hash of the previous block in the chain.
    pub prev_blockhash: Hash,
    /// Merkle root of the block's transactions.
    pub merkle_root: Hash,
    /// Block timestamp, seconds since the Unix epoch.
    pub time: u32,
    /// Compact proof-of-work target.
    pub bits: Bits,
    /// Nonce used to satisfy the proof-of-work.
    pub nonce: u32,
}

/// Failure decoding or validating a block header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// The buffer was not exactly 80 bytes.
    #[error("expected {HEADER_SIZE} bytes, got {0}")]
    WrongSize(usize),
    /// The header's hash does not satisfy its own target.
    #[error("invalid proof of work")]
    InvalidProofOfWork,
    /// The header's target decodes to zero.
    #[error("zero proof-of-work target")]
    ZeroTarget,
}

impl BlockHeader {
    /// Parse an 80-byte buffer into a header, verifying proof-of-work unless
    /// `skip_pow` is set (used in tests and when reconstructing headers
    /// already known to be valid from storage).
    pub fn parse(bytes: &[u8], skip_pow: bool) -> Result<BlockHeader, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::WrongSize(bytes.len()));
        }
        let mut version_buf = [0u8; 4];
        version_buf.copy_from_slice(&bytes[0..4]);
        let version = i32::from_le_bytes(version_buf);

        let mut prev = [0u8; 32];
        prev.copy_from_slice(&bytes[4..36]);

        let mut merkle = [0u8; 32];
        merkle.copy_from_slice(&bytes[36..68]);

        let mut time_buf = [0u8; 4];
        time_buf.copy_from_slice(&bytes[68..72]);
        let time = u32::from_le_bytes(time_buf);

        let mut bits_buf = [0u8; 4];
        bits_buf.copy_from_slice(&bytes[72..76]);
        let bits = Bits(u32::from_le_bytes(bits_buf));

        let mut nonce_buf = [0u8; 4];
        nonce_buf.copy_from_slice(&bytes[76..80]);
        let nonce = u32::from_le_bytes(nonce_buf);

        let header = BlockHeader {
            version,
            prev_blockhash: Hash(prev),
            merkle_root: Hash(merkle),
            time,
            bits,
            nonce,
        };

        if !skip_pow {
            let target = header.bits.target();
            if header.hash().as_uint256() > target.0 {
                return Err(HeaderError::InvalidProofOfWork);
            }
        }

        Ok(header)
    }

    /// Serialize back to the canonical 80-byte buffer.
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_blockhash.0);
        out[36..68].copy_from_slice(&self.merkle_root.0);
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.0.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// The header's double-SHA-256 hash.
    pub fn hash(&self) -> Hash {
        let buf = self.serialize();
        let first = Sha256::digest(buf);
        let second = Sha256::digest(first);
        let mut out = [0u8; 32];
        out.copy_from_slice(&second);
        Hash(out)
    }

    /// The decoded proof-of-work target.
    pub fn target(&self) -> Target {
        self.bits.target()
    }

    /// The proof-of-work this header represents.
    pub fn work(&self) -> Work {
        self.target().work().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis_bsv() -> BlockHeader {
        // Bitcoin mainnet genesis block header, shared by BSV/BCH/BTC prior
        // to their respective forks.
        let hex = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";
        let bytes = hex::decode(hex).unwrap();
        BlockHeader::parse(&bytes, false).unwrap()
    }

    #[test]
    fn genesis_hash_and_work_match_known_values() {
        let header = genesis_bsv();
        assert_eq!(
            header.hash().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert_eq!(header.work().0, crate::uint256::U256::from_u64(4_295_032_833));
    }

    #[test]
    fn parse_then_serialize_is_identity() {
        let header = genesis_bsv();
        let bytes = header.serialize();
        let reparsed = BlockHeader::parse(&bytes, false).unwrap();
        assert_eq!(header, reparsed);
    }

    #[test]
    fn wrong_size_is_rejected() {
        let err = BlockHeader::parse(&[0u8; 79], true).unwrap_err();
        assert_eq!(err, HeaderError::WrongSize(79));
    }

    #[test]
    fn bad_proof_of_work_is_rejected_unless_skipped() {
        let mut header = genesis_bsv();
        header.nonce = header.nonce.wrapping_add(1);
        let bytes = header.serialize();
        assert!(matches!(
            BlockHeader::parse(&bytes, false),
            Err(HeaderError::InvalidProofOfWork)
        ));
        assert!(BlockHeader::parse(&bytes, true).is_ok());
    }
}
