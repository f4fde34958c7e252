use crate::log::entry::{
    EntryError, EntryType, SegmentFooter, SegmentHeader, ENTRY_FRAME_OVERHEAD,
    SEGMENT_FORMAT_VERSION,
};
use crc32fast::Hasher as Crc32Hasher;
use thiserror::Error;

const FOOTER_FRAME_LEN: usize = ENTRY_FRAME_OVERHEAD + 8;
const HEADER_FRAME_LEN: usize = ENTRY_FRAME_OVERHEAD + 24;

/// A bounded byte region written sequentially with framed entries. The header
/// entry is written at construction; `close` seals the segment with a crc32
/// footer and forbids further appends. Space for the footer is reserved up
/// front so `close` cannot fail.
#[derive(Debug)]
pub struct Segment {
    id: u64,
    server_id: u64,
    capacity: usize,
    buf: Vec<u8>,
    closed: bool,
}

impl Segment {
    pub fn new(id: u64, server_id: u64, capacity: usize) -> Self {
        let capacity = capacity.max(HEADER_FRAME_LEN + FOOTER_FRAME_LEN);
        let mut segment = Self {
            id,
            server_id,
            capacity,
            buf: Vec::with_capacity(capacity),
            closed: false,
        };
        let header = SegmentHeader {
            segment_id: id,
            server_id,
            format_version: SEGMENT_FORMAT_VERSION,
        };
        segment.push_frame(EntryType::SegmentHeader, &header.encode());
        segment
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Appends one framed entry, returning the payload offset, or `None` when
    /// the segment is sealed or the entry does not fit in the remaining
    /// capacity. The caller rotates to a fresh segment on `None`.
    pub fn append(&mut self, ty: EntryType, payload: &[u8]) -> Option<u32> {
        if self.closed {
            return None;
        }
        let frame_len = ENTRY_FRAME_OVERHEAD + payload.len();
        if self.buf.len() + frame_len + FOOTER_FRAME_LEN > self.capacity {
            return None;
        }
        Some(self.push_frame(ty, payload))
    }

    /// Seals the segment with a footer whose checksum covers every byte
    /// written so far. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let mut hasher = Crc32Hasher::new();
        hasher.update(&self.buf);
        let footer = SegmentFooter {
            checksum: hasher.finalize(),
        };
        self.push_frame(EntryType::SegmentFooter, &footer.encode());
        self.closed = true;
    }

    pub fn payload(&self, offset: u32, len: u32) -> Option<&[u8]> {
        let start = offset as usize;
        let end = start.checked_add(len as usize)?;
        self.buf.get(start..end)
    }

    fn push_frame(&mut self, ty: EntryType, payload: &[u8]) -> u32 {
        self.buf.push(ty as u8);
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        let offset = self.buf.len() as u32;
        self.buf.extend_from_slice(payload);
        offset
    }
}

/// Parsed view of a recovered segment byte region. Parsing validates the
/// framing end to end, so entry iteration is infallible afterwards.
#[derive(Debug, PartialEq)]
pub struct SegmentReader<'a> {
    header: SegmentHeader,
    entries: Vec<(EntryType, &'a [u8])>,
}

impl<'a> SegmentReader<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, SegmentError> {
        let mut cursor = 0usize;
        let mut header: Option<SegmentHeader> = None;
        let mut entries = Vec::new();
        while cursor < bytes.len() {
            let (ty, payload, next) = read_frame(bytes, cursor)?;
            match ty {
                EntryType::SegmentHeader => {
                    if header.is_some() || cursor != 0 {
                        return Err(SegmentError::MisplacedHeader);
                    }
                    let decoded = SegmentHeader::decode(payload)?;
                    if decoded.format_version != SEGMENT_FORMAT_VERSION {
                        return Err(SegmentError::UnsupportedVersion(decoded.format_version));
                    }
                    header = Some(decoded);
                }
                EntryType::SegmentFooter => {
                    let footer = SegmentFooter::decode(payload)?;
                    let mut hasher = Crc32Hasher::new();
                    hasher.update(&bytes[..cursor]);
                    let computed = hasher.finalize();
                    if computed != footer.checksum {
                        return Err(SegmentError::ChecksumMismatch {
                            expected: footer.checksum,
                            computed,
                        });
                    }
                    if next != bytes.len() {
                        return Err(SegmentError::TrailingData);
                    }
                    let header = header.ok_or(SegmentError::MissingHeader)?;
                    return Ok(Self { header, entries });
                }
                EntryType::Object | EntryType::Tombstone => {
                    if header.is_none() {
                        return Err(SegmentError::MissingHeader);
                    }
                    entries.push((ty, payload));
                }
            }
            cursor = next;
        }
        Err(SegmentError::MissingFooter)
    }

    pub fn header(&self) -> SegmentHeader {
        self.header
    }

    pub fn segment_id(&self) -> u64 {
        self.header.segment_id
    }

    /// Object and tombstone entries in append order.
    pub fn entries(&self) -> impl Iterator<Item = (EntryType, &'a [u8])> + '_ {
        self.entries.iter().copied()
    }
}

fn read_frame(bytes: &[u8], cursor: usize) -> Result<(EntryType, &[u8], usize), SegmentError> {
    if bytes.len() - cursor < ENTRY_FRAME_OVERHEAD {
        return Err(SegmentError::Truncated(cursor));
    }
    let ty = EntryType::from_u8(bytes[cursor])?;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[cursor + 1..cursor + 5]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    let start = cursor + ENTRY_FRAME_OVERHEAD;
    let end = match start.checked_add(len) {
        Some(end) if end <= bytes.len() => end,
        _ => return Err(SegmentError::Truncated(cursor)),
    };
    Ok((ty, &bytes[start..end], end))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("segment truncated at offset {0}")]
    Truncated(usize),
    #[error("segment missing header")]
    MissingHeader,
    #[error("segment header out of place")]
    MisplacedHeader,
    #[error("unsupported segment format version {0}")]
    UnsupportedVersion(u32),
    #[error("segment missing footer")]
    MissingFooter,
    #[error("data after segment footer")]
    TrailingData,
    #[error("segment checksum mismatch (expected {expected:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error(transparent)]
    Entry(#[from] EntryError),
}
