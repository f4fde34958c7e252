use thiserror::Error;

/// Magic value opening every segment header and closing every footer.
pub const SEGMENT_MAGIC: u32 = 0x5345_474d;
/// On-wire version of the segment layout.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Bytes of framing in front of every entry payload: type tag plus length.
pub const ENTRY_FRAME_OVERHEAD: usize = 1 + 4;

const OBJECT_HEADER_LEN: usize = 4 + 8 + 8 + 4;
const TOMBSTONE_LEN: usize = 4 + 8 + 8 + 8;
const SEGMENT_HEADER_LEN: usize = 4 + 8 + 8 + 4;
const SEGMENT_FOOTER_LEN: usize = 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    SegmentHeader = 1,
    Object = 2,
    Tombstone = 3,
    SegmentFooter = 4,
}

impl EntryType {
    pub fn from_u8(raw: u8) -> Result<Self, EntryError> {
        match raw {
            1 => Ok(EntryType::SegmentHeader),
            2 => Ok(EntryType::Object),
            3 => Ok(EntryType::Tombstone),
            4 => Ok(EntryType::SegmentFooter),
            other => Err(EntryError::UnknownType(other)),
        }
    }
}

/// First entry of every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub segment_id: u64,
    pub server_id: u64,
    pub format_version: u32,
}

impl SegmentHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SEGMENT_HEADER_LEN);
        bytes.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&self.segment_id.to_le_bytes());
        bytes.extend_from_slice(&self.server_id.to_le_bytes());
        bytes.extend_from_slice(&self.format_version.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EntryError> {
        if bytes.len() != SEGMENT_HEADER_LEN {
            return Err(EntryError::LengthMismatch);
        }
        if read_u32(&bytes[0..4]) != SEGMENT_MAGIC {
            return Err(EntryError::BadMagic);
        }
        Ok(Self {
            segment_id: read_u64(&bytes[4..12]),
            server_id: read_u64(&bytes[12..20]),
            format_version: read_u32(&bytes[20..24]),
        })
    }
}

/// Last entry of every sealed segment. The checksum covers every byte of the
/// segment in front of the footer's own frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFooter {
    pub checksum: u32,
}

impl SegmentFooter {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SEGMENT_FOOTER_LEN);
        bytes.extend_from_slice(&self.checksum.to_le_bytes());
        bytes.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EntryError> {
        if bytes.len() != SEGMENT_FOOTER_LEN {
            return Err(EntryError::LengthMismatch);
        }
        if read_u32(&bytes[4..8]) != SEGMENT_MAGIC {
            return Err(EntryError::BadMagic);
        }
        Ok(Self {
            checksum: read_u32(&bytes[0..4]),
        })
    }
}

/// Decoded view of an `OBJECT` entry; `data` borrows the underlying segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRecord<'a> {
    pub table_id: u32,
    pub object_id: u64,
    pub version: u64,
    pub data: &'a [u8],
}

impl<'a> ObjectRecord<'a> {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(OBJECT_HEADER_LEN + self.data.len());
        bytes.extend_from_slice(&self.table_id.to_le_bytes());
        bytes.extend_from_slice(&self.object_id.to_le_bytes());
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(self.data);
        bytes
    }

    pub fn decode(bytes: &'a [u8]) -> Result<Self, EntryError> {
        if bytes.len() < OBJECT_HEADER_LEN {
            return Err(EntryError::TooShort);
        }
        let data_len = read_u32(&bytes[20..24]) as usize;
        if bytes.len() != OBJECT_HEADER_LEN + data_len {
            return Err(EntryError::LengthMismatch);
        }
        Ok(Self {
            table_id: read_u32(&bytes[0..4]),
            object_id: read_u64(&bytes[4..12]),
            version: read_u64(&bytes[12..20]),
            data: &bytes[OBJECT_HEADER_LEN..],
        })
    }
}

/// A `TOMBSTONE` entry: marks removal of the object at `object_version`,
/// remembering which segment held the removed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    pub table_id: u32,
    pub object_id: u64,
    pub segment_id: u64,
    pub object_version: u64,
}

impl Tombstone {
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(TOMBSTONE_LEN);
        bytes.extend_from_slice(&self.table_id.to_le_bytes());
        bytes.extend_from_slice(&self.object_id.to_le_bytes());
        bytes.extend_from_slice(&self.segment_id.to_le_bytes());
        bytes.extend_from_slice(&self.object_version.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EntryError> {
        if bytes.len() != TOMBSTONE_LEN {
            return Err(EntryError::LengthMismatch);
        }
        Ok(Self {
            table_id: read_u32(&bytes[0..4]),
            object_id: read_u64(&bytes[4..12]),
            segment_id: read_u64(&bytes[12..20]),
            object_version: read_u64(&bytes[20..28]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut array = [0u8; 4];
    array.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(array)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut array = [0u8; 8];
    array.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(array)
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry payload too short")]
    TooShort,
    #[error("entry payload length mismatch")]
    LengthMismatch,
    #[error("bad segment magic")]
    BadMagic,
    #[error("unknown entry type {0}")]
    UnknownType(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_record_round_trip() {
        let record = ObjectRecord {
            table_id: 7,
            object_id: 42,
            version: 3,
            data: b"hello",
        };
        let bytes = record.encode();
        let decoded = ObjectRecord::decode(&bytes).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn object_record_rejects_bad_data_len() {
        let record = ObjectRecord {
            table_id: 1,
            object_id: 1,
            version: 1,
            data: b"abc",
        };
        let mut bytes = record.encode();
        bytes.push(0);
        assert_eq!(
            ObjectRecord::decode(&bytes),
            Err(EntryError::LengthMismatch)
        );
    }

    #[test]
    fn tombstone_round_trip() {
        let tomb = Tombstone {
            table_id: 9,
            object_id: 2006,
            segment_id: 87,
            object_version: 12,
        };
        assert_eq!(Tombstone::decode(&tomb.encode()).unwrap(), tomb);
    }

    #[test]
    fn segment_header_checks_magic() {
        let header = SegmentHeader {
            segment_id: 87,
            server_id: 2,
            format_version: SEGMENT_FORMAT_VERSION,
        };
        let mut bytes = header.encode();
        assert_eq!(SegmentHeader::decode(&bytes).unwrap(), header);
        bytes[0] ^= 0xFF;
        assert_eq!(SegmentHeader::decode(&bytes), Err(EntryError::BadMagic));
    }

    #[test]
    fn unknown_entry_type_is_rejected() {
        assert_eq!(EntryType::from_u8(2), Ok(EntryType::Object));
        assert_eq!(EntryType::from_u8(9), Err(EntryError::UnknownType(9)));
    }
}
