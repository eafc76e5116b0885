//! Message buffers exchanged over the transport.

use byteorder::{ByteOrder, LittleEndian};

use crate::protocol::MkhiHeader;

/// A command or response: a header dword followed by payload dwords.
///
/// The exact byte length is kept alongside the words because frames carry
/// byte lengths and many responses end mid-dword.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    words: Vec<u32>,
    len: usize,
}

impl Message {
    /// Build a message from whole dwords.
    pub fn from_words(words: Vec<u32>) -> Self {
        let len = words.len() * 4;
        Self { words, len }
    }

    /// Build a message from a header and body.
    pub fn new(header: u32, body: &[u32]) -> Self {
        let mut words = Vec::with_capacity(body.len() + 1);
        words.push(header);
        words.extend_from_slice(body);
        Self::from_words(words)
    }

    /// Build a message from little-endian bytes; the tail dword is zero padded.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut words = vec![0u32; data.len().div_ceil(4)];
        let whole = data.len() / 4;
        LittleEndian::read_u32_into(&data[..whole * 4], &mut words[..whole]);
        if whole < words.len() {
            let mut tail = [0u8; 4];
            tail[..data.len() - whole * 4].copy_from_slice(&data[whole * 4..]);
            words[whole] = LittleEndian::read_u32(&tail);
        }
        Self {
            words,
            len: data.len(),
        }
    }

    /// Header dword (zero for an empty message).
    pub fn header(&self) -> u32 {
        self.words.first().copied().unwrap_or_default()
    }

    /// Header interpreted as MKHI.
    pub fn mkhi_header(&self) -> MkhiHeader {
        MkhiHeader::from_raw(self.header())
    }

    /// Payload dwords after the header.
    pub fn body(&self) -> &[u32] {
        self.words.get(1..).unwrap_or_default()
    }

    /// All dwords, header first.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Length in dwords.
    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Little-endian bytes, trimmed to the byte length.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.words.len() * 4];
        LittleEndian::write_u32_into(&self.words, &mut out);
        out.truncate(self.len);
        out
    }
}
