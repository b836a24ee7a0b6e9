//! On-disk framing for segment logs
//!
//! A segment log file starts with a fixed header made of two slots. Every
//! commit writes the slot that the previous commit did not touch, so a torn
//! header write can only damage the slot being replaced and the other one
//! still describes a consistent log. On open, the valid slot with the highest
//! sequence number wins.
//!
//! ```text
//! slot (48 bytes, little-endian):
//!   [0..4)   magic
//!   [4..6)   format version
//!   [6..8)   reserved (zero)
//!   [8..16)  sequence
//!   [16..24) head offset (first live frame)
//!   [24..32) tail offset (end of last committed frame)
//!   [32..40) record count
//!   [40..44) checksum of bytes [0..40)
//!   [44..48) reserved (zero)
//!
//! frame:
//!   [0..4)   payload length
//!   [4..8)   payload checksum
//!   [8..)    UTF-8 payload
//! ```

use sha2::{Digest, Sha256};

/// Magic number identifying a segment log slot ("OSLG")
pub const MAGIC: u32 = 0x4F53_4C47;

/// Current on-disk format version
pub const FORMAT_VERSION: u16 = 1;

/// Size of one header slot in bytes
pub const SLOT_LEN: usize = 48;

/// Size of the whole header (both slots); the first frame starts here
pub const HEADER_LEN: u64 = 2 * SLOT_LEN as u64;

/// Size of a frame header (length + checksum)
pub const FRAME_HEADER_LEN: u64 = 8;

/// Largest payload a single record may carry
pub const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// Committed state of a segment log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Commit sequence number; selects which slot this header lives in
    pub sequence: u64,

    /// Offset of the oldest live frame
    pub head: u64,

    /// Offset just past the newest committed frame
    pub tail: u64,

    /// Number of live records
    pub count: u64,
}

impl Header {
    /// Header of a freshly created, empty log
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            head: HEADER_LEN,
            tail: HEADER_LEN,
            count: 0,
        }
    }

    /// Builds the header of the next commit
    pub fn next(&self, head: u64, tail: u64, count: u64) -> Self {
        Self {
            sequence: self.sequence + 1,
            head,
            tail,
            count,
        }
    }

    /// Offset of the slot this header is written to
    pub fn slot_offset(&self) -> u64 {
        (self.sequence % 2) * SLOT_LEN as u64
    }

    /// Number of bytes occupied by live frames
    pub fn live_bytes(&self) -> u64 {
        self.tail - self.head
    }

    /// Number of bytes occupied by removed frames ahead of the head
    pub fn dead_bytes(&self) -> u64 {
        self.head - HEADER_LEN
    }

    pub fn encode(&self) -> [u8; SLOT_LEN] {
        let mut buf = [0u8; SLOT_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        buf[16..24].copy_from_slice(&self.head.to_le_bytes());
        buf[24..32].copy_from_slice(&self.tail.to_le_bytes());
        buf[32..40].copy_from_slice(&self.count.to_le_bytes());
        let sum = checksum(&buf[0..40]);
        buf[40..44].copy_from_slice(&sum.to_le_bytes());
        buf
    }

    /// Decodes a slot, returning None if it is blank, torn or from another format
    pub fn decode(buf: &[u8; SLOT_LEN]) -> Option<Self> {
        if read_u32(buf, 0) != MAGIC {
            return None;
        }
        if u16::from_le_bytes([buf[4], buf[5]]) != FORMAT_VERSION {
            return None;
        }
        if read_u32(buf, 40) != checksum(&buf[0..40]) {
            return None;
        }

        Some(Self {
            sequence: read_u64(buf, 8),
            head: read_u64(buf, 16),
            tail: read_u64(buf, 24),
            count: read_u64(buf, 32),
        })
    }
}

/// Picks the most recent valid header out of the two slots
pub fn select_header(first: Option<Header>, second: Option<Header>) -> Option<Header> {
    match (first, second) {
        (Some(a), Some(b)) => Some(if a.sequence >= b.sequence { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Length and checksum prefix of a record frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len: u32,
    pub checksum: u32,
}

impl FrameHeader {
    pub fn decode(buf: &[u8; FRAME_HEADER_LEN as usize]) -> Self {
        Self {
            len: read_u32(buf, 0),
            checksum: read_u32(buf, 4),
        }
    }

    /// Total size of the frame on disk
    pub fn frame_len(&self) -> u64 {
        FRAME_HEADER_LEN + u64::from(self.len)
    }
}

/// Encodes a record as a complete frame ready to be appended
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// First four bytes of the SHA-256 digest, little-endian
pub fn checksum(bytes: &[u8]) -> u32 {
    let digest = Sha256::digest(bytes);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(word)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(word)
}
