//! A minimal 256-bit unsigned integer, just capable enough for proof-of-work
//! targets and cumulative chain work. Mirrors the handful of operations
//! `bitcoin::util::uint::Uint256` provides, without pulling in the full
//! `bitcoincash` dependency tree.

use std::fmt;
use std::ops::{Add, Shl};

/// A 256-bit unsigned integer, stored as four little-endian 64-bit limbs
/// (`limbs[0]` is the least significant).
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct U256(pub [u64; 4]);

impl U256 {
    /// The value zero.
    pub const ZERO: U256 = U256([0, 0, 0, 0]);

    /// Construct from a small integer.
    pub fn from_u64(n: u64) -> Self {
        U256([n, 0, 0, 0])
    }

    /// Parse from a 32-byte big-endian buffer.
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let start = 32 - (i + 1) * 8;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[start..start + 8]);
            *limb = u64::from_be_bytes(buf);
        }
        U256(limbs)
    }

    /// Serialize to a 32-byte big-endian buffer.
    pub fn to_be_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for i in 0..4 {
            let start = 32 - (i + 1) * 8;
            out[start..start + 8].copy_from_slice(&self.0[i].to_be_bytes());
        }
        out
    }

    /// Whether this is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0, 0]
    }

    /// Bitwise NOT.
    pub fn not(self) -> Self {
        U256([!self.0[0], !self.0[1], !self.0[2], !self.0[3]])
    }

    fn bit(&self, i: u32) -> bool {
        let limb = (i / 64) as usize;
        let off = i % 64;
        (self.0[limb] >> off) & 1 == 1
    }

    fn set_bit(&mut self, i: u32) {
        let limb = (i / 64) as usize;
        let off = i % 64;
        self.0[limb] |= 1 << off;
    }

    fn shl1(&mut self) {
        let mut carry = 0u64;
        for limb in self.0.iter_mut() {
            let new_carry = *limb >> 63;
            *limb = (*limb << 1) | carry;
            carry = new_carry;
        }
        // Any bit carried out of limb[3] is simply dropped: every target or
        // work value this module deals with is far smaller than 2^255, so
        // the remainder in `div_rem` never grows large enough to lose bits
        // here. See `div_rem` for the invariant this relies on.
    }

    /// Divide `self` by `den`, returning `(quotient, remainder)`.
    ///
    /// Panics if `den` is zero. Implemented as straightforward binary long
    /// division; `den` is assumed to be well below `2^255` (true of every
    /// proof-of-work target and work value used by this crate), so the
    /// truncating shift in `shl1` never discards a significant bit.
    pub fn div_rem(self, den: U256) -> (U256, U256) {
        assert!(!den.is_zero(), "division by zero");
        let mut quotient = U256::ZERO;
        let mut remainder = U256::ZERO;
        for i in (0..256u32).rev() {
            remainder.shl1();
            if self.bit(i) {
                remainder.0[0] |= 1;
            }
            if remainder >= den {
                remainder = remainder - den;
                quotient.set_bit(i);
            }
        }
        (quotient, remainder)
    }
}

impl std::ops::Sub for U256 {
    type Output = U256;

    fn sub(self, rhs: U256) -> U256 {
        let mut out = [0u64; 4];
        let mut borrow: i128 = 0;
        for i in 0..4 {
            let diff = self.0[i] as i128 - rhs.0[i] as i128 - borrow;
            if diff < 0 {
                out[i] = (diff + (1i128 << 64)) as u64;
                borrow = 1;
            } else {
                out[i] = diff as u64;
                borrow = 0;
            }
        }
        U256(out)
    }
}

impl Add for U256 {
    type Output = U256;

    /// Wrapping addition. Cumulative chain work never approaches `2^256` for
    /// any real proof-of-work chain, so wrapping is never observed in
    /// practice; it is chosen over a panicking overflow check to keep
    /// `work_total` accumulation infallible, matching how `bitcoin::Uint256`
    /// itself behaves under `+`.
    fn add(self, rhs: U256) -> U256 {
        let mut out = [0u64; 4];
        let mut carry = 0u128;
        for i in 0..4 {
            let sum = self.0[i] as u128 + rhs.0[i] as u128 + carry;
            out[i] = sum as u64;
            carry = sum >> 64;
        }
        U256(out)
    }
}

impl Shl<u32> for U256 {
    type Output = U256;

    fn shl(self, rhs: u32) -> U256 {
        let mut out = self;
        for _ in 0..rhs {
            out.shl1();
        }
        out
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for i in (0..4).rev() {
            let ord = self.0[i].cmp(&other.0[i]);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_be_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_be_bytes() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xde;
        bytes[31] = 0xef;
        let n = U256::from_be_bytes(&bytes);
        assert_eq!(n.to_be_bytes(), bytes);
    }

    #[test]
    fn div_rem_matches_simple_cases() {
        let (q, r) = U256::from_u64(10).div_rem(U256::from_u64(3));
        assert_eq!(q, U256::from_u64(3));
        assert_eq!(r, U256::from_u64(1));
    }

    #[test]
    fn ordering_respects_magnitude() {
        assert!(U256::from_u64(1) < U256::from_u64(2));
        assert!(U256([0, 1, 0, 0]) > U256::from_u64(u64::MAX));
    }
}
