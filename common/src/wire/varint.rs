//! Canonical Bitcoin-family variable-length integer encoding.

use thiserror::Error;

/// Failure decoding a varint or a length-prefixed buffer derived from one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarIntError {
    /// The buffer ended before the varint's length prefix was fully read.
    #[error("buffer too short for varint")]
    Truncated,
}

/// Encode `n` using the canonical 1/3/5/9-byte scheme.
pub fn encode(n: u64) -> Vec<u8> {
    if n < 0xfd {
        vec![n as u8]
    } else if n <= 0xffff {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(n as u16).to_le_bytes());
        out
    } else if n <= 0xffff_ffff {
        let mut out = vec![0xfe];
        out.extend_from_slice(&(n as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xff];
        out.extend_from_slice(&n.to_le_bytes());
        out
    }
}

/// Decode a varint from the front of `buf`, returning the value and the
/// number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), VarIntError> {
    let lead = *buf.first().ok_or(VarIntError::Truncated)?;
    match lead {
        0xfd => {
            let bytes = buf.get(1..3).ok_or(VarIntError::Truncated)?;
            Ok((u16::from_le_bytes([bytes[0], bytes[1]]) as u64, 3))
        }
        0xfe => {
            let bytes = buf.get(1..5).ok_or(VarIntError::Truncated)?;
            let mut arr = [0u8; 4];
            arr.copy_from_slice(bytes);
            Ok((u32::from_le_bytes(arr) as u64, 5))
        }
        0xff => {
            let bytes = buf.get(1..9).ok_or(VarIntError::Truncated)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Ok((u64::from_le_bytes(arr), 9))
        }
        n => Ok((n as u64, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_size_class() {
        for n in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            let encoded = encode(n);
            let (decoded, used) = decode(&encoded).unwrap();
            assert_eq!(decoded, n);
            assert_eq!(used, encoded.len());
        }
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        assert_eq!(decode(&[0xfd, 0x01]), Err(VarIntError::Truncated));
        assert_eq!(decode(&[]), Err(VarIntError::Truncated));
    }
}
