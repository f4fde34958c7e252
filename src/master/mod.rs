//! The master service: owns the tablet set, the object index, and the log,
//! and serves the versioned mutation protocol. All mutations run on the
//! single dispatch thread; `&mut self` is the mutation lock.

pub mod recovery;

use crate::cluster::{BackupConnector, CoordinatorClient, ReplicationSink, ServerKind};
use crate::config::MasterConfig;
use crate::error::MasterError;
use crate::index::{EntryTag, IndexEntry, ObjectIndex, ObjectKey};
use crate::log::entry::{EntryType, ObjectRecord, Tombstone};
use crate::log::Log;
use crate::tablet::{Table, TabletConfigError, TabletSpec, TabletState, TabletTable};
use crate::wire::{RejectRules, VERSION_NONEXISTENT};
use log::{debug, info};
use std::sync::Arc;

/// Everything the master needs from the outside world, passed in explicitly
/// at startup.
pub struct MasterContext {
    pub coordinator: Arc<dyn CoordinatorClient>,
    pub backups: Arc<dyn BackupConnector>,
    pub replication: Arc<dyn ReplicationSink>,
}

pub struct MasterService {
    config: MasterConfig,
    ctx: MasterContext,
    server_id: u64,
    tablets: TabletTable,
    index: ObjectIndex,
    log: Log,
}

impl MasterService {
    /// Enlists with the coordinator and brings up an empty master.
    pub fn enlist(config: MasterConfig, ctx: MasterContext) -> Result<Self, MasterError> {
        let server_id = ctx
            .coordinator
            .enlist_server(ServerKind::Master, &config.locator)?;
        info!("master {} enlisted at {}", server_id, config.locator);
        let log = Log::new(server_id, config.segment_bytes, config.max_segments());
        let index = ObjectIndex::with_capacity(config.index_entries);
        Ok(Self {
            config,
            ctx,
            server_id,
            tablets: TabletTable::new(),
            index,
            log,
        })
    }

    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn tablets(&self) -> &TabletTable {
        &self.tablets
    }

    pub fn object_index(&self) -> &ObjectIndex {
        &self.index
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn ping(&self) {}

    /// Replaces the owned tablet set with the coordinator's new assignment.
    pub fn set_tablets(&mut self, specs: &[TabletSpec]) -> Result<(), TabletConfigError> {
        self.tablets.set_tablets(specs)?;
        info!("now serving {} tablets", self.tablets.len());
        for tablet in self.tablets.iter() {
            debug!(
                "tablet table {} [{}, {}] {:?}",
                tablet.table_id(),
                tablet.start(),
                tablet.end(),
                tablet.state()
            );
        }
        Ok(())
    }

    /// Evaluates reject rules against the key's current version. A current
    /// version of `VERSION_NONEXISTENT` means no object; the `exists` and
    /// version rules only apply when an object exists.
    pub fn reject_operation(rules: &RejectRules, current_version: u64) -> Result<(), MasterError> {
        if current_version == VERSION_NONEXISTENT {
            if rules.doesnt_exist {
                return Err(MasterError::object_doesnt_exist());
            }
            return Ok(());
        }
        if rules.exists {
            return Err(MasterError::ObjectExists { current_version });
        }
        if rules.version_le_given && current_version <= rules.given_version {
            return Err(MasterError::WrongVersion { current_version });
        }
        if rules.version_ne_given && current_version != rules.given_version {
            return Err(MasterError::WrongVersion { current_version });
        }
        Ok(())
    }

    /// Allocates the next object id in the table, stores `value`, and returns
    /// `(object_id, version)`. Ids already present in the index are skipped.
    pub fn create(&mut self, table_id: u32, value: &[u8]) -> Result<(u64, u64), MasterError> {
        let table = self.any_table_handle(table_id)?;
        loop {
            let object_id = table.allocate_object_id();
            self.serving_table(table_id, object_id)?;
            let key = ObjectKey::new(table_id, object_id);
            if self.index.lookup(key).is_some() {
                continue;
            }
            let version = self.store_object(&table, key, value, VERSION_NONEXISTENT, None)?;
            debug!(
                "created object {} in table {} at version {}",
                object_id, table_id, version
            );
            return Ok((object_id, version));
        }
    }

    /// Returns the value bytes (a view into the log) and the current version.
    pub fn read(
        &self,
        table_id: u32,
        object_id: u64,
        rules: &RejectRules,
    ) -> Result<(&[u8], u64), MasterError> {
        self.serving_table(table_id, object_id)?;
        let key = ObjectKey::new(table_id, object_id);
        let (current, entry) = self.live_version(key)?;
        Self::reject_operation(rules, current)?;
        match entry {
            Some(IndexEntry::Object(log_ref)) => {
                let record = self.log.object_at(log_ref)?;
                Ok((record.data, record.version))
            }
            _ => Err(MasterError::object_doesnt_exist()),
        }
    }

    /// Stores a new revision of the object and returns its version.
    pub fn write(
        &mut self,
        table_id: u32,
        object_id: u64,
        value: &[u8],
        rules: &RejectRules,
    ) -> Result<u64, MasterError> {
        let table = self.serving_table(table_id, object_id)?;
        let key = ObjectKey::new(table_id, object_id);
        let (current, prior) = self.live_version(key)?;
        Self::reject_operation(rules, current)?;
        self.store_object(&table, key, value, current, prior)
    }

    /// Removes the object, returning the version it had. Removing an absent
    /// (or already removed) key returns `VERSION_NONEXISTENT` unless the
    /// rules reject.
    pub fn remove(
        &mut self,
        table_id: u32,
        object_id: u64,
        rules: &RejectRules,
    ) -> Result<u64, MasterError> {
        let table = self.serving_table(table_id, object_id)?;
        let key = ObjectKey::new(table_id, object_id);
        let (current, entry) = self.live_version(key)?;
        Self::reject_operation(rules, current)?;
        let object_ref = match entry {
            Some(IndexEntry::Object(log_ref)) => log_ref,
            _ => return Ok(VERSION_NONEXISTENT),
        };
        let tombstone = Tombstone {
            table_id,
            object_id,
            segment_id: object_ref.segment_id,
            object_version: current,
        };
        let payload = tombstone.encode();
        let log_ref = self.log.append(EntryType::Tombstone, &payload)?;
        self.ctx.replication.replicate(log_ref.segment_id, &payload)?;
        let replaced = self
            .index
            .replace(key, IndexEntry::Tombstone(log_ref), EntryTag::Object);
        debug_assert!(replaced, "single-writer index update cannot race");
        table.raise_version(current + 1);
        debug!(
            "removed object {} in table {} at version {}",
            object_id, table_id, current
        );
        Ok(current)
    }

    /// Log append, replication acknowledgement, then index update, in that
    /// order; a failure anywhere leaves the index untouched.
    fn store_object(
        &mut self,
        table: &Table,
        key: ObjectKey,
        value: &[u8],
        current: u64,
        prior: Option<IndexEntry>,
    ) -> Result<u64, MasterError> {
        let version = table.assign_version(current);
        let payload = ObjectRecord {
            table_id: key.table_id,
            object_id: key.object_id,
            version,
            data: value,
        }
        .encode();
        let log_ref = self.log.append(EntryType::Object, &payload)?;
        self.ctx.replication.replicate(log_ref.segment_id, &payload)?;
        let entry = IndexEntry::Object(log_ref);
        let updated = match prior {
            None => self.index.insert(key, entry),
            Some(existing) => self.index.replace(key, entry, existing.tag()),
        };
        debug_assert!(updated, "single-writer index update cannot race");
        Ok(version)
    }

    /// The table handle of the `Normal` tablet covering the key, or the
    /// appropriate rejection.
    fn serving_table(&self, table_id: u32, object_id: u64) -> Result<Arc<Table>, MasterError> {
        let tablet = self
            .tablets
            .find(table_id, object_id)
            .ok_or(MasterError::TableDoesntExist)?;
        match tablet.state() {
            TabletState::Normal => Ok(Arc::clone(tablet.table())),
            TabletState::Recovering | TabletState::LockedForMigration => Err(MasterError::Retry),
        }
    }

    fn any_table_handle(&self, table_id: u32) -> Result<Arc<Table>, MasterError> {
        self.tablets
            .iter()
            .find(|t| t.table_id() == table_id)
            .map(|t| Arc::clone(t.table()))
            .ok_or(MasterError::TableDoesntExist)
    }

    /// Current version of the key: a live object's version, or
    /// `VERSION_NONEXISTENT` for absent and tombstoned keys.
    fn live_version(&self, key: ObjectKey) -> Result<(u64, Option<IndexEntry>), MasterError> {
        match self.index.lookup(key) {
            Some(entry @ IndexEntry::Object(log_ref)) => {
                Ok((self.log.object_at(log_ref)?.version, Some(entry)))
            }
            Some(entry @ IndexEntry::Tombstone(_)) => Ok((VERSION_NONEXISTENT, Some(entry))),
            None => Ok((VERSION_NONEXISTENT, None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RejectRules {
        RejectRules::default()
    }

    #[test]
    fn reject_operation_on_nonexistent_object() {
        let reject = RejectRules {
            doesnt_exist: true,
            ..rules()
        };
        let err = MasterService::reject_operation(&reject, VERSION_NONEXISTENT).unwrap_err();
        assert!(matches!(err, MasterError::ObjectDoesntExist { .. }));
        assert_eq!(err.current_version(), Some(VERSION_NONEXISTENT));

        // With no object, the exists and version rules never fire.
        let pass = RejectRules {
            exists: true,
            version_le_given: true,
            version_ne_given: true,
            ..rules()
        };
        assert!(MasterService::reject_operation(&pass, VERSION_NONEXISTENT).is_ok());
    }

    #[test]
    fn reject_operation_on_existing_object() {
        let reject = RejectRules {
            exists: true,
            ..rules()
        };
        let err = MasterService::reject_operation(&reject, 2).unwrap_err();
        assert!(matches!(
            err,
            MasterError::ObjectExists { current_version: 2 }
        ));
    }

    #[test]
    fn reject_operation_version_le_given() {
        let reject = RejectRules {
            given_version: 0x4_0000_0001,
            version_le_given: true,
            ..rules()
        };
        for current in [0x4_0000_0000, 0x4_0000_0001] {
            let err = MasterService::reject_operation(&reject, current).unwrap_err();
            assert_eq!(err.current_version(), Some(current));
            assert!(matches!(err, MasterError::WrongVersion { .. }));
        }
        assert!(MasterService::reject_operation(&reject, 0x4_0000_0002).is_ok());
    }

    #[test]
    fn reject_operation_version_ne_given() {
        let reject = RejectRules {
            given_version: 0x4_0000_0001,
            version_ne_given: true,
            ..rules()
        };
        assert!(MasterService::reject_operation(&reject, 0x4_0000_0000).is_err());
        assert!(MasterService::reject_operation(&reject, 0x4_0000_0001).is_ok());
        assert!(MasterService::reject_operation(&reject, 0x4_0000_0002).is_err());
    }

    #[test]
    fn reject_operation_truth_table() {
        // Exhaustive over the four flags and the four version relations.
        for mask in 0u8..16 {
            let reject = RejectRules {
                given_version: 10,
                doesnt_exist: mask & 1 != 0,
                exists: mask & 2 != 0,
                version_le_given: mask & 4 != 0,
                version_ne_given: mask & 8 != 0,
            };
            for current in [VERSION_NONEXISTENT, 9, 10, 11] {
                let outcome = MasterService::reject_operation(&reject, current);
                let expected_err = if current == VERSION_NONEXISTENT {
                    reject.doesnt_exist
                } else {
                    reject.exists
                        || (reject.version_le_given && current <= 10)
                        || (reject.version_ne_given && current != 10)
                };
                assert_eq!(
                    outcome.is_err(),
                    expected_err,
                    "mask {mask:#06b}, current {current}"
                );
            }
        }
    }
}
