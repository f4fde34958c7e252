//! Recovery of a failed master's partition: pull its segments from backup
//! peers, replay them through the three-way object/tombstone merge, then hand
//! the tablets back to the coordinator.

use crate::cluster::{BackupError, BackupListEntry, CoordinatorError};
use crate::index::{IndexEntry, ObjectKey};
use crate::log::entry::{EntryError, EntryType, ObjectRecord, Tombstone};
use crate::log::segment::{SegmentError, SegmentReader};
use crate::log::LogError;
use crate::master::MasterService;
use crate::tablet::{TabletConfigError, TabletSpec};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Counts of replayed entries for one segment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub objects_stored: u64,
    pub objects_dropped: u64,
    pub tombstones_stored: u64,
    pub tombstones_dropped: u64,
}

impl MasterService {
    /// Recovers one partition of `failed_master_id`. The tablets are served
    /// as `Recovering` (mutations get `Retry`) until every segment in
    /// `backup_list` has been replayed; they are then published as `Normal`
    /// and the coordinator is told. Any segment that no candidate backup can
    /// serve fails the whole partition, and the installed tablets are
    /// discarded for the coordinator to reassign.
    pub fn recover(
        &mut self,
        failed_master_id: u64,
        partition_id: u64,
        tablets: &[TabletSpec],
        backup_list: &[BackupListEntry],
    ) -> Result<(), RecoveryError> {
        info!(
            "recovering master {}, partition {}, {} tablets, {} backup entries",
            failed_master_id,
            partition_id,
            tablets.len(),
            backup_list.len()
        );
        self.tablets.install_recovering(tablets)?;
        match self.fetch_and_replay(failed_master_id, partition_id, tablets, backup_list) {
            Ok(()) => {
                self.tablets.mark_normal(tablets);
                for tablet in tablets {
                    info!(
                        "tablet {} [{}, {}] now serving on master {}",
                        tablet.table_id, tablet.start, tablet.end, self.server_id
                    );
                }
                self.ctx.coordinator.tablets_recovered(tablets)?;
                self.remove_tombstones();
                Ok(())
            }
            Err(err) => {
                warn!(
                    "recovery of master {} partition {} failed: {}",
                    failed_master_id, partition_id, err
                );
                self.tablets.drop_tablets(tablets);
                Err(err)
            }
        }
    }

    fn fetch_and_replay(
        &mut self,
        failed_master_id: u64,
        partition_id: u64,
        tablets: &[TabletSpec],
        backup_list: &[BackupListEntry],
    ) -> Result<(), RecoveryError> {
        let mut candidates: BTreeMap<u64, Vec<&str>> = BTreeMap::new();
        for entry in backup_list {
            candidates
                .entry(entry.segment_id)
                .or_default()
                .push(entry.locator.as_str());
        }
        for (segment_id, list) in candidates.iter_mut() {
            let seed = recovery_seed(failed_master_id, partition_id, *segment_id);
            list.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        }

        // One start_reading_data per distinct backup; the returned set tells
        // us which candidates are actually worth asking.
        let mut willing: HashMap<&str, Option<HashSet<u64>>> = HashMap::new();
        for entry in backup_list {
            if willing.contains_key(entry.locator.as_str()) {
                continue;
            }
            let served = self
                .ctx
                .backups
                .session(&entry.locator)
                .and_then(|session| session.start_reading_data(failed_master_id, tablets));
            let served = match served {
                Ok(ids) => {
                    debug!(
                        "backup {} is willing to serve {} segments",
                        entry.locator,
                        ids.len()
                    );
                    Some(ids.into_iter().collect())
                }
                Err(err) => {
                    warn!("start_reading_data failed on {}: {}", entry.locator, err);
                    None
                }
            };
            willing.insert(entry.locator.as_str(), served);
        }

        for (segment_id, list) in &candidates {
            let mut recovered = false;
            for locator in list {
                if let Some(Some(served)) = willing.get(locator) {
                    if !served.contains(segment_id) {
                        debug!("backup {} is not serving segment {}", locator, segment_id);
                        continue;
                    }
                }
                match self.fetch_segment(failed_master_id, *segment_id, locator) {
                    Ok(stats) => {
                        info!(
                            "segment {} replay complete ({} objects, {} tombstones stored)",
                            segment_id, stats.objects_stored, stats.tombstones_stored
                        );
                        recovered = true;
                        break;
                    }
                    Err(err) => warn!(
                        "recovering segment {} from {} failed: {}; trying next backup",
                        segment_id, locator, err
                    ),
                }
            }
            if !recovered {
                return Err(RecoveryError::SegmentRecoveryFailed {
                    segment_id: *segment_id,
                });
            }
        }
        Ok(())
    }

    fn fetch_segment(
        &mut self,
        failed_master_id: u64,
        segment_id: u64,
        locator: &str,
    ) -> Result<ReplayStats, SegmentFetchError> {
        debug!(
            "fetching recovery data for segment {} from {}",
            segment_id, locator
        );
        let session = self.ctx.backups.session(locator)?;
        let bytes = session.get_recovery_data(failed_master_id, segment_id)?;
        debug!("recovering segment {} with {} bytes", segment_id, bytes.len());
        Ok(self.recover_segment(segment_id, &bytes)?)
    }

    /// Replays one recovered segment into the index, re-appending accepted
    /// entries to the local log. Idempotent and order-independent: replaying
    /// the same segments again, or in another order, converges to the same
    /// index.
    pub fn recover_segment(
        &mut self,
        segment_id: u64,
        bytes: &[u8],
    ) -> Result<ReplayStats, SegmentReplayError> {
        let reader = SegmentReader::parse(bytes)?;
        if reader.segment_id() != segment_id {
            return Err(SegmentReplayError::SegmentIdMismatch {
                requested: segment_id,
                actual: reader.segment_id(),
            });
        }
        let mut stats = ReplayStats::default();
        for (ty, payload) in reader.entries() {
            match ty {
                EntryType::Object => {
                    let record = ObjectRecord::decode(payload)?;
                    if self.replay_object(record)? {
                        stats.objects_stored += 1;
                    } else {
                        stats.objects_dropped += 1;
                    }
                }
                EntryType::Tombstone => {
                    let tombstone = Tombstone::decode(payload)?;
                    if self.replay_tombstone(tombstone)? {
                        stats.tombstones_stored += 1;
                    } else {
                        stats.tombstones_dropped += 1;
                    }
                }
                EntryType::SegmentHeader | EntryType::SegmentFooter => {}
            }
        }
        Ok(stats)
    }

    /// A replayed object beats an indexed object only with a strictly newer
    /// version, beats an indexed tombstone only with a strictly newer
    /// version, and always lands on an empty slot.
    fn replay_object(&mut self, record: ObjectRecord<'_>) -> Result<bool, SegmentReplayError> {
        let Some(tablet) = self.tablets.find(record.table_id, record.object_id) else {
            debug!(
                "dropping replayed object {}.{}: no owned tablet covers it",
                record.table_id, record.object_id
            );
            return Ok(false);
        };
        let table = Arc::clone(tablet.table());
        let key = ObjectKey::new(record.table_id, record.object_id);
        let (accept, prior) = match self.index.lookup(key) {
            None => (true, None),
            Some(entry @ IndexEntry::Object(log_ref)) => (
                record.version > self.log.object_at(log_ref)?.version,
                Some(entry),
            ),
            Some(entry @ IndexEntry::Tombstone(log_ref)) => (
                record.version > self.log.tombstone_at(log_ref)?.object_version,
                Some(entry),
            ),
        };
        if !accept {
            return Ok(false);
        }
        let payload = record.encode();
        let log_ref = self.log.append(EntryType::Object, &payload)?;
        let entry = IndexEntry::Object(log_ref);
        match prior {
            None => {
                self.index.insert(key, entry);
            }
            Some(existing) => {
                self.index.replace(key, entry, existing.tag());
            }
        }
        table.raise_version(record.version);
        Ok(true)
    }

    /// A replayed tombstone beats an indexed object at an equal-or-newer
    /// version (equal versions mean the remove shadowed exactly that object),
    /// beats an indexed tombstone only with a strictly newer version, and
    /// always lands on an empty slot.
    fn replay_tombstone(&mut self, tombstone: Tombstone) -> Result<bool, SegmentReplayError> {
        let Some(tablet) = self.tablets.find(tombstone.table_id, tombstone.object_id) else {
            debug!(
                "dropping replayed tombstone {}.{}: no owned tablet covers it",
                tombstone.table_id, tombstone.object_id
            );
            return Ok(false);
        };
        let table = Arc::clone(tablet.table());
        let key = ObjectKey::new(tombstone.table_id, tombstone.object_id);
        let (accept, prior) = match self.index.lookup(key) {
            None => (true, None),
            Some(entry @ IndexEntry::Object(log_ref)) => (
                tombstone.object_version >= self.log.object_at(log_ref)?.version,
                Some(entry),
            ),
            Some(entry @ IndexEntry::Tombstone(log_ref)) => (
                tombstone.object_version > self.log.tombstone_at(log_ref)?.object_version,
                Some(entry),
            ),
        };
        if !accept {
            return Ok(false);
        }
        let payload = tombstone.encode();
        let log_ref = self.log.append(EntryType::Tombstone, &payload)?;
        let entry = IndexEntry::Tombstone(log_ref);
        match prior {
            None => {
                self.index.insert(key, entry);
            }
            Some(existing) => {
                self.index.replace(key, entry, existing.tag());
            }
        }
        table.raise_version(tombstone.object_version);
        Ok(true)
    }

    /// Drops every tombstone from the index. Tombstones exist to shadow
    /// older-arriving entries during replay; once a recovery has published
    /// its tablets they are dead weight.
    pub fn remove_tombstones(&mut self) {
        let keys: Vec<ObjectKey> = self.index.iter_tombstones().map(|(key, _)| key).collect();
        let count = keys.len();
        for key in keys {
            self.index.remove(key);
        }
        if count > 0 {
            debug!("removed {} tombstones from the index", count);
        }
    }
}

fn recovery_seed(failed_master_id: u64, partition_id: u64, segment_id: u64) -> u64 {
    failed_master_id
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(partition_id.rotate_left(17))
        ^ segment_id
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("segment {segment_id} could not be recovered from any backup")]
    SegmentRecoveryFailed { segment_id: u64 },
    #[error(transparent)]
    InvalidTablets(#[from] TabletConfigError),
    #[error("coordinator notification failed: {0}")]
    Coordinator(#[from] CoordinatorError),
}

#[derive(Debug, Error)]
pub enum SegmentReplayError {
    #[error("segment id mismatch: requested {requested}, header says {actual}")]
    SegmentIdMismatch { requested: u64, actual: u64 },
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Entry(#[from] EntryError),
    #[error(transparent)]
    Log(#[from] LogError),
}

#[derive(Debug, Error)]
enum SegmentFetchError {
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Replay(#[from] SegmentReplayError),
}
