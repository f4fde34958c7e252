#![allow(dead_code)]

use memtor::{
    BackupClient, BackupConnector, BackupError, CoordinatorClient, CoordinatorError, EntryType,
    MasterConfig, MasterContext, MasterService, NullReplication, ObjectRecord, Segment, ServerKind,
    TabletSpec, Tombstone,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Coordinator fixture: hands out server ids and records every
/// `tablets_recovered` call.
#[derive(Debug, Default)]
pub struct RecordingCoordinator {
    next_server_id: AtomicU64,
    pub recovered: Mutex<Vec<Vec<TabletSpec>>>,
}

impl RecordingCoordinator {
    pub fn new() -> Self {
        Self {
            next_server_id: AtomicU64::new(1),
            recovered: Mutex::new(Vec::new()),
        }
    }

    pub fn recovered_calls(&self) -> Vec<Vec<TabletSpec>> {
        self.recovered.lock().unwrap().clone()
    }
}

impl CoordinatorClient for RecordingCoordinator {
    fn enlist_server(&self, _kind: ServerKind, _locator: &str) -> Result<u64, CoordinatorError> {
        Ok(self.next_server_id.fetch_add(1, Ordering::SeqCst))
    }

    fn tablets_recovered(&self, tablets: &[TabletSpec]) -> Result<(), CoordinatorError> {
        self.recovered.lock().unwrap().push(tablets.to_vec());
        Ok(())
    }
}

/// Backup fixture serving segments from memory.
#[derive(Debug, Default)]
pub struct InMemoryBackup {
    segments: Mutex<HashMap<u64, Vec<u8>>>,
}

impl InMemoryBackup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_segment(&self, segment_id: u64, bytes: Vec<u8>) {
        self.segments.lock().unwrap().insert(segment_id, bytes);
    }
}

impl BackupClient for InMemoryBackup {
    fn start_reading_data(
        &self,
        _master_id: u64,
        _tablets: &[TabletSpec],
    ) -> Result<Vec<u64>, BackupError> {
        let mut ids: Vec<u64> = self.segments.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn get_recovery_data(&self, _master_id: u64, segment_id: u64) -> Result<Vec<u8>, BackupError> {
        self.segments
            .lock()
            .unwrap()
            .get(&segment_id)
            .cloned()
            .ok_or(BackupError::BadSegmentId(segment_id))
    }
}

/// Locator-to-backup registry standing in for the transport.
#[derive(Debug, Default)]
pub struct BackupRegistry {
    backups: HashMap<String, Arc<InMemoryBackup>>,
}

impl BackupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, locator: &str, backup: Arc<InMemoryBackup>) {
        self.backups.insert(locator.to_string(), backup);
    }
}

impl BackupConnector for BackupRegistry {
    fn session(&self, locator: &str) -> Result<Arc<dyn BackupClient>, BackupError> {
        self.backups
            .get(locator)
            .map(|backup| Arc::clone(backup) as Arc<dyn BackupClient>)
            .ok_or_else(|| BackupError::UnknownLocator(locator.to_string()))
    }
}

/// A master with one `Normal` tablet covering all of table 0, the shape most
/// scenarios start from.
pub fn new_master_with_registry(
    registry: BackupRegistry,
) -> (MasterService, Arc<RecordingCoordinator>) {
    let coordinator = Arc::new(RecordingCoordinator::new());
    let mut config = MasterConfig::new("mock:host=master", "mock:host=coordinator");
    config.segment_bytes = 64 * 1024;
    config.log_bytes = 4 * 1024 * 1024;
    config.index_entries = 1024;
    let ctx = MasterContext {
        coordinator: Arc::clone(&coordinator) as Arc<dyn CoordinatorClient>,
        backups: Arc::new(registry),
        replication: Arc::new(NullReplication),
    };
    let mut master = MasterService::enlist(config, ctx).expect("enlist");
    master
        .set_tablets(&[TabletSpec::normal(0, 0, u64::MAX)])
        .expect("tablets");
    (master, coordinator)
}

pub fn new_master() -> MasterService {
    new_master_with_registry(BackupRegistry::new()).0
}

/// Builds a sealed segment of object entries, the way a backup would serve it.
pub fn build_object_segment(segment_id: u64, objects: &[(u32, u64, u64, &[u8])]) -> Vec<u8> {
    let mut segment = Segment::new(segment_id, 99, 64 * 1024);
    for &(table_id, object_id, version, data) in objects {
        let payload = ObjectRecord {
            table_id,
            object_id,
            version,
            data,
        }
        .encode();
        segment
            .append(EntryType::Object, &payload)
            .expect("segment append");
    }
    segment.close();
    segment.bytes().to_vec()
}

/// Builds a sealed segment of tombstone entries.
pub fn build_tombstone_segment(segment_id: u64, tombstones: &[Tombstone]) -> Vec<u8> {
    let mut segment = Segment::new(segment_id, 99, 64 * 1024);
    for tombstone in tombstones {
        segment
            .append(EntryType::Tombstone, &tombstone.encode())
            .expect("segment append");
    }
    segment.close();
    segment.bytes().to_vec()
}
