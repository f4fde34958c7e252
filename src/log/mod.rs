//! Append-only log: a sequence of bounded segments owning all object and
//! tombstone bytes. The index and mutation paths hold only `LogRef`s into it.

pub mod entry;
pub mod segment;

use crate::log::entry::{EntryError, EntryType, ObjectRecord, Tombstone};
use crate::log::segment::Segment;
use std::collections::BTreeMap;
use thiserror::Error;

/// Non-owning reference to one entry payload inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRef {
    pub segment_id: u64,
    pub offset: u32,
    pub len: u32,
}

/// The master's log. Appends go to the active segment; a full segment is
/// sealed and a fresh one opened. Sealed segments are retained until the
/// cleaner reclaims them, so every issued `LogRef` stays resolvable.
#[derive(Debug)]
pub struct Log {
    server_id: u64,
    segment_capacity: usize,
    max_segments: usize,
    next_segment_id: u64,
    active: Segment,
    sealed: BTreeMap<u64, Segment>,
}

impl Log {
    pub fn new(server_id: u64, segment_capacity: usize, max_segments: usize) -> Self {
        let mut next_segment_id = 0;
        let active = Segment::new(next_segment_id, server_id, segment_capacity);
        next_segment_id += 1;
        Self {
            server_id,
            segment_capacity,
            max_segments: max_segments.max(1),
            next_segment_id,
            active,
            sealed: BTreeMap::new(),
        }
    }

    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    pub fn head_segment_id(&self) -> u64 {
        self.active.id()
    }

    pub fn segment_count(&self) -> usize {
        self.sealed.len() + 1
    }

    /// Appends one entry, rotating to a new segment when the active one is
    /// full.
    pub fn append(&mut self, ty: EntryType, payload: &[u8]) -> Result<LogRef, LogError> {
        if let Some(offset) = self.active.append(ty, payload) {
            return Ok(self.make_ref(offset, payload.len()));
        }
        self.rotate()?;
        match self.active.append(ty, payload) {
            Some(offset) => Ok(self.make_ref(offset, payload.len())),
            None => Err(LogError::EntryTooLarge {
                len: payload.len(),
                segment_capacity: self.segment_capacity,
            }),
        }
    }

    pub fn entry_payload(&self, log_ref: LogRef) -> Result<&[u8], LogError> {
        let segment = if log_ref.segment_id == self.active.id() {
            &self.active
        } else {
            self.sealed
                .get(&log_ref.segment_id)
                .ok_or(LogError::DanglingRef(log_ref))?
        };
        segment
            .payload(log_ref.offset, log_ref.len)
            .ok_or(LogError::DanglingRef(log_ref))
    }

    pub fn object_at(&self, log_ref: LogRef) -> Result<ObjectRecord<'_>, LogError> {
        Ok(ObjectRecord::decode(self.entry_payload(log_ref)?)?)
    }

    pub fn tombstone_at(&self, log_ref: LogRef) -> Result<Tombstone, LogError> {
        Ok(Tombstone::decode(self.entry_payload(log_ref)?)?)
    }

    fn make_ref(&self, offset: u32, len: usize) -> LogRef {
        LogRef {
            segment_id: self.active.id(),
            offset,
            len: len as u32,
        }
    }

    fn rotate(&mut self) -> Result<(), LogError> {
        if self.segment_count() >= self.max_segments {
            return Err(LogError::LogFull {
                segments: self.segment_count(),
            });
        }
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        let mut sealed = std::mem::replace(
            &mut self.active,
            Segment::new(id, self.server_id, self.segment_capacity),
        );
        sealed.close();
        self.sealed.insert(sealed.id(), sealed);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("entry of {len} bytes exceeds segment capacity {segment_capacity}")]
    EntryTooLarge { len: usize, segment_capacity: usize },
    #[error("log is full ({segments} segments)")]
    LogFull { segments: usize },
    #[error("dangling log reference {0:?}")]
    DanglingRef(LogRef),
    #[error(transparent)]
    Entry(#[from] EntryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_payload(object_id: u64, version: u64, data: &[u8]) -> Vec<u8> {
        ObjectRecord {
            table_id: 0,
            object_id,
            version,
            data,
        }
        .encode()
    }

    #[test]
    fn append_resolves_through_ref() {
        let mut log = Log::new(1, 4096, 8);
        let payload = object_payload(5, 1, b"value");
        let log_ref = log.append(EntryType::Object, &payload).unwrap();
        let record = log.object_at(log_ref).unwrap();
        assert_eq!(record.object_id, 5);
        assert_eq!(record.data, b"value");
    }

    #[test]
    fn rotation_preserves_old_refs() {
        let mut log = Log::new(1, 256, 16);
        let first = log
            .append(EntryType::Object, &object_payload(1, 1, &[7u8; 100]))
            .unwrap();
        let mut last = first;
        for i in 2..10 {
            last = log
                .append(EntryType::Object, &object_payload(i, 1, &[7u8; 100]))
                .unwrap();
        }
        assert!(log.segment_count() > 1);
        assert_ne!(first.segment_id, last.segment_id);
        assert_eq!(log.object_at(first).unwrap().object_id, 1);
        assert_eq!(log.object_at(last).unwrap().object_id, 9);
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let mut log = Log::new(1, 128, 8);
        let err = log
            .append(EntryType::Object, &object_payload(1, 1, &[0u8; 1024]))
            .unwrap_err();
        assert!(matches!(err, LogError::EntryTooLarge { .. }));
    }

    #[test]
    fn full_log_rejects_rotation() {
        let mut log = Log::new(1, 256, 2);
        let mut err = None;
        for i in 0..64 {
            if let Err(e) = log.append(EntryType::Object, &object_payload(i, 1, &[1u8; 100])) {
                err = Some(e);
                break;
            }
        }
        assert!(matches!(err, Some(LogError::LogFull { .. })));
    }

    #[test]
    fn dangling_ref_is_reported() {
        let log = Log::new(1, 4096, 8);
        let bogus = LogRef {
            segment_id: 99,
            offset: 0,
            len: 4,
        };
        assert!(matches!(
            log.entry_payload(bogus),
            Err(LogError::DanglingRef(_))
        ));
    }
}
