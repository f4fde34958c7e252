//! Hash index from `(table_id, object_id)` to a tagged log reference. The
//! index never owns payload bytes; it records just enough to find an entry in
//! the log and to tell a live object from a tombstone.

use crate::log::LogRef;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub table_id: u32,
    pub object_id: u64,
}

impl ObjectKey {
    pub fn new(table_id: u32, object_id: u64) -> Self {
        Self {
            table_id,
            object_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTag {
    Object,
    Tombstone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEntry {
    Object(LogRef),
    Tombstone(LogRef),
}

impl IndexEntry {
    pub fn tag(&self) -> EntryTag {
        match self {
            IndexEntry::Object(_) => EntryTag::Object,
            IndexEntry::Tombstone(_) => EntryTag::Tombstone,
        }
    }

    pub fn log_ref(&self) -> LogRef {
        match self {
            IndexEntry::Object(r) | IndexEntry::Tombstone(r) => *r,
        }
    }
}

#[derive(Debug, Default)]
pub struct ObjectIndex {
    map: HashMap<ObjectKey, IndexEntry>,
}

impl ObjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(entries: usize) -> Self {
        Self {
            map: HashMap::with_capacity(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn lookup(&self, key: ObjectKey) -> Option<IndexEntry> {
        self.map.get(&key).copied()
    }

    /// Inserts only when the key is absent. Returns true when the key was
    /// absent.
    pub fn insert(&mut self, key: ObjectKey, entry: IndexEntry) -> bool {
        match self.map.entry(key) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
            std::collections::hash_map::Entry::Occupied(_) => false,
        }
    }

    /// Replaces the current entry only when its tag matches `expect`. Returns
    /// false when the key is absent or holds the other tag.
    pub fn replace(&mut self, key: ObjectKey, entry: IndexEntry, expect: EntryTag) -> bool {
        match self.map.get_mut(&key) {
            Some(current) if current.tag() == expect => {
                *current = entry;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, key: ObjectKey) -> Option<IndexEntry> {
        self.map.remove(&key)
    }

    /// All tombstone entries, in no particular order. Used by the sweep after
    /// recovery completes.
    pub fn iter_tombstones(&self) -> impl Iterator<Item = (ObjectKey, LogRef)> + '_ {
        self.map.iter().filter_map(|(key, entry)| match entry {
            IndexEntry::Tombstone(r) => Some((*key, *r)),
            IndexEntry::Object(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_ref(segment_id: u64, offset: u32) -> LogRef {
        LogRef {
            segment_id,
            offset,
            len: 16,
        }
    }

    #[test]
    fn insert_respects_existing_entries() {
        let mut index = ObjectIndex::new();
        let key = ObjectKey::new(0, 7);
        assert!(index.insert(key, IndexEntry::Object(log_ref(0, 10))));
        assert!(!index.insert(key, IndexEntry::Object(log_ref(0, 99))));
        assert_eq!(index.lookup(key).unwrap().log_ref().offset, 10);
    }

    #[test]
    fn replace_checks_expected_tag() {
        let mut index = ObjectIndex::new();
        let key = ObjectKey::new(1, 1);
        assert!(!index.replace(key, IndexEntry::Object(log_ref(0, 1)), EntryTag::Object));
        index.insert(key, IndexEntry::Object(log_ref(0, 1)));
        assert!(!index.replace(
            key,
            IndexEntry::Object(log_ref(0, 2)),
            EntryTag::Tombstone
        ));
        assert!(index.replace(
            key,
            IndexEntry::Tombstone(log_ref(0, 3)),
            EntryTag::Object
        ));
        assert_eq!(index.lookup(key).unwrap().tag(), EntryTag::Tombstone);
    }

    #[test]
    fn iter_tombstones_skips_objects() {
        let mut index = ObjectIndex::new();
        index.insert(ObjectKey::new(0, 1), IndexEntry::Object(log_ref(0, 1)));
        index.insert(ObjectKey::new(0, 2), IndexEntry::Tombstone(log_ref(0, 2)));
        index.insert(ObjectKey::new(0, 3), IndexEntry::Tombstone(log_ref(1, 3)));
        let mut keys: Vec<u64> = index.iter_tombstones().map(|(k, _)| k.object_id).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![2, 3]);
    }

    #[test]
    fn remove_returns_entry() {
        let mut index = ObjectIndex::new();
        let key = ObjectKey::new(0, 4);
        index.insert(key, IndexEntry::Object(log_ref(2, 8)));
        let removed = index.remove(key).unwrap();
        assert_eq!(removed.log_ref().segment_id, 2);
        assert!(index.lookup(key).is_none());
    }
}
