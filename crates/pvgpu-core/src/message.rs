//! Command transport message codec.
//!
//! A message on the ring is `length + 1` little-endian 32-bit words:
//!
//! ```text
//!   word 0   header: len[4:0] | WRITE_FENCE[8] | action[31:16]
//!   word 1   fence
//!   word 2.. payload
//! ```
//!
//! `len` counts the fence word plus the payload, so the largest payload is
//! 30 words.

use crate::error::{PvError, Result};

pub const LEN_MASK: u32 = 0x1F;
pub const WRITE_FENCE_TO_DESC: u32 = 1 << 8;
pub const ACTION_SHIFT: u32 = 16;

/// Payload words that fit under `LEN_MASK` once the fence is counted.
pub const MAX_PAYLOAD_WORDS: usize = LEN_MASK as usize - 1;

/// Encoded header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader(u32);

impl MessageHeader {
    /// Build the header for an action carrying `payload_words` of payload.
    pub fn new(action: u16, payload_words: usize) -> Result<Self> {
        if payload_words > MAX_PAYLOAD_WORDS {
            return Err(PvError::EncodingTooLarge {
                words: payload_words,
                max: MAX_PAYLOAD_WORDS,
            });
        }
        let len = payload_words as u32 + 1;
        Ok(Self(
            ((action as u32) << ACTION_SHIFT) | WRITE_FENCE_TO_DESC | len,
        ))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Length field: fence word plus payload words.
    #[inline]
    pub const fn len(self) -> u32 {
        self.0 & LEN_MASK
    }

    #[inline]
    pub const fn action(self) -> u16 {
        (self.0 >> ACTION_SHIFT) as u16
    }

    #[inline]
    pub const fn writes_fence(self) -> bool {
        self.0 & WRITE_FENCE_TO_DESC != 0
    }

    /// Words the whole message occupies on the ring, header included.
    #[inline]
    pub const fn total_words(self) -> usize {
        self.len() as usize + 1
    }
}

/// A decoded (or to-be-encoded) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub action: u16,
    pub fence: u32,
    pub payload: Vec<u32>,
}

impl Message {
    pub fn new(action: u16, fence: u32, payload: &[u32]) -> Self {
        Self {
            action,
            fence,
            payload: payload.to_vec(),
        }
    }

    pub fn header(&self) -> Result<MessageHeader> {
        MessageHeader::new(self.action, self.payload.len())
    }

    pub fn to_words(&self) -> Result<Vec<u32>> {
        let header = self.header()?;
        let mut words = Vec::with_capacity(header.total_words());
        words.push(header.raw());
        words.push(self.fence);
        words.extend_from_slice(&self.payload);
        Ok(words)
    }

    /// Decode one message from the front of `words`. Trailing words are
    /// ignored; use [`MessageHeader::total_words`] to step to the next one.
    pub fn from_words(words: &[u32]) -> Result<Self> {
        let Some(&raw) = words.first() else {
            return Err(PvError::Malformed("empty message"));
        };
        let header = MessageHeader::from_raw(raw);
        if header.len() == 0 {
            return Err(PvError::Malformed("message without fence word"));
        }
        let total = header.total_words();
        if words.len() < total {
            return Err(PvError::Malformed("truncated message"));
        }
        Ok(Self {
            action: header.action(),
            fence: words[1],
            payload: words[2..total].to_vec(),
        })
    }

    pub fn to_le_bytes(&self) -> Result<Vec<u8>> {
        Ok(self
            .to_words()?
            .into_iter()
            .flat_map(u32::to_le_bytes)
            .collect())
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(PvError::Malformed("byte length not word aligned"));
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::from_words(&words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let h = MessageHeader::new(9, 3).unwrap();
        assert_eq!(h.raw(), (9 << 16) | (1 << 8) | 4);
        assert_eq!(h.len(), 4);
        assert_eq!(h.action(), 9);
        assert!(h.writes_fence());
        assert_eq!(h.total_words(), 5);
    }

    #[test]
    fn test_max_payload() {
        let h = MessageHeader::new(1, MAX_PAYLOAD_WORDS).unwrap();
        assert_eq!(h.len(), LEN_MASK);
        assert_eq!(h.total_words(), 32);

        match MessageHeader::new(1, MAX_PAYLOAD_WORDS + 1) {
            Err(PvError::EncodingTooLarge { words, max }) => {
                assert_eq!(words, 31);
                assert_eq!(max, 30);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_bytes() {
        let msg = Message::new(3, 77, &[0xAABBCCDD, 1, 2]);
        let bytes = msg.to_le_bytes().unwrap();
        assert_eq!(bytes.len(), 5 * 4);
        // header is little-endian: len=4 in the first byte
        assert_eq!(bytes[0], 4);
        assert_eq!(bytes[1], 1);
        assert_eq!(Message::from_le_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_ignores_trailing_words() {
        let mut words = Message::new(6, 1, &[5]).to_words().unwrap();
        words.extend_from_slice(&[0xFFFF_FFFF; 4]);
        let msg = Message::from_words(&words).unwrap();
        assert_eq!(msg.payload, vec![5]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Message::from_words(&[]).is_err());
        assert!(Message::from_words(&[0]).is_err());
        assert!(Message::from_words(&[(1 << 16) | 5, 1]).is_err());
        assert!(Message::from_le_bytes(&[1, 2, 3]).is_err());
    }
}
