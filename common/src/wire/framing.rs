//! Message framing: 24-byte header (magic, command, length, checksum) plus
//! payload. `deframe` is pure and restartable: callers append newly
//! received bytes to its returned `remaining` before calling it again.

use sha2::{Digest, Sha256};

const COMMAND_LEN: usize = 12;
const FRAME_HEADER_LEN: usize = 4 + COMMAND_LEN + 4 + 4;

fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[0..4]);
    out
}

/// Encode one message frame.
pub fn frame(magic: u32, command: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&magic.to_le_bytes());

    let mut cmd_buf = [0u8; COMMAND_LEN];
    let cmd_bytes = command.as_bytes();
    cmd_buf[..cmd_bytes.len()].copy_from_slice(cmd_bytes);
    out.extend_from_slice(&cmd_buf);

    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(payload));
    out.extend_from_slice(payload);
    out
}

/// The outcome of one `deframe` call.
#[derive(Debug, Default)]
pub struct Deframed {
    /// Successfully parsed `(command, payload)` messages, in arrival order.
    pub messages: Vec<(String, Vec<u8>)>,
    /// Bytes not yet consumed; feed back in on the next call after
    /// appending newly received bytes.
    pub remaining: Vec<u8>,
    /// Frames whose checksum failed to verify, tagged with their command.
    pub errors: Vec<(String, String)>,
}

fn command_from_bytes(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Slide through `buffer` extracting every complete, checksum-valid frame
/// whose magic matches `magic`.
pub fn deframe(buffer: &[u8], magic: u32) -> Deframed {
    let mut out = Deframed::default();
    let magic_bytes = magic.to_le_bytes();
    let mut cursor = 0usize;

    loop {
        // Slide forward until the next occurrence of `magic` or exhaustion.
        let Some(offset) = buffer[cursor..]
            .windows(4)
            .position(|w| w == magic_bytes)
        else {
            out.remaining = buffer[cursor..].to_vec();
            return out;
        };
        cursor += offset;

        if buffer.len() - cursor < FRAME_HEADER_LEN {
            out.remaining = buffer[cursor..].to_vec();
            return out;
        }

        let command = command_from_bytes(&buffer[cursor + 4..cursor + 4 + COMMAND_LEN]);
        let len_offset = cursor + 4 + COMMAND_LEN;
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&buffer[len_offset..len_offset + 4]);
        let payload_len = u32::from_le_bytes(len_buf) as usize;

        let checksum_offset = len_offset + 4;
        let mut declared_checksum = [0u8; 4];
        declared_checksum.copy_from_slice(&buffer[checksum_offset..checksum_offset + 4]);

        let payload_offset = checksum_offset + 4;
        let frame_end = payload_offset + payload_len;
        if frame_end > buffer.len() {
            // Incomplete: wait for more bytes.
            out.remaining = buffer[cursor..].to_vec();
            return out;
        }

        let payload = &buffer[payload_offset..frame_end];
        if checksum(payload) == declared_checksum {
            out.messages.push((command, payload.to_vec()));
        } else {
            out.errors.push((command, "checksum mismatch".to_string()));
        }
        cursor = frame_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0xe8f3_e1e3;

    #[test]
    fn round_trips_several_concatenated_frames() {
        let m1 = frame(MAGIC, "verack", &[]);
        let m2 = frame(MAGIC, "ping", &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut buffer = m1.clone();
        buffer.extend_from_slice(&m2);

        let result = deframe(&buffer, MAGIC);
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[0].0, "verack");
        assert_eq!(result.messages[1].0, "ping");
        assert!(result.remaining.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn partial_trailing_frame_is_left_in_remaining() {
        let m1 = frame(MAGIC, "verack", &[]);
        let mut buffer = m1.clone();
        let m2 = frame(MAGIC, "ping", &[1; 8]);
        buffer.extend_from_slice(&m2[..m2.len() - 2]);

        let result = deframe(&buffer, MAGIC);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.remaining, &m2[..m2.len() - 2]);
    }

    #[test]
    fn bad_checksum_is_reported_and_skipped() {
        let mut m1 = frame(MAGIC, "ping", &[1, 2, 3, 4, 5, 6, 7, 8]);
        // Corrupt the checksum field.
        m1[4 + 12 + 4] ^= 0xff;
        let m2 = frame(MAGIC, "verack", &[]);
        let mut buffer = m1;
        buffer.extend_from_slice(&m2);

        let result = deframe(&buffer, MAGIC);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, "ping");
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].0, "verack");
    }
}
