//! Seams to the rest of the cluster: the coordinator that assigns tablets,
//! the backups that hold replicated segments, and the replication
//! acknowledgement path for mutations. Real transports live outside this
//! crate; tests plug in in-memory implementations.

use crate::tablet::TabletSpec;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Master,
    Backup,
}

/// One `(backup locator, segment id)` pair from the coordinator's backup
/// list. A segment replicated to several backups appears once per replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupListEntry {
    pub locator: String,
    pub segment_id: u64,
}

impl BackupListEntry {
    pub fn new(locator: impl Into<String>, segment_id: u64) -> Self {
        Self {
            locator: locator.into(),
            segment_id,
        }
    }
}

/// Cluster-wide authority for membership and tablet assignment.
pub trait CoordinatorClient {
    fn enlist_server(&self, kind: ServerKind, locator: &str) -> Result<u64, CoordinatorError>;
    fn tablets_recovered(&self, tablets: &[TabletSpec]) -> Result<(), CoordinatorError>;
}

/// A backup peer serving recovery data for a failed master.
pub trait BackupClient {
    /// Announces the recovery and returns the segments this backup is willing
    /// to serve; the backup starts staging them in the background.
    fn start_reading_data(
        &self,
        master_id: u64,
        tablets: &[TabletSpec],
    ) -> Result<Vec<u64>, BackupError>;

    fn get_recovery_data(&self, master_id: u64, segment_id: u64) -> Result<Vec<u8>, BackupError>;
}

/// Resolves a backup locator to a live session. Stands in for the transport
/// registry, passed to the master as explicit context.
pub trait BackupConnector {
    fn session(&self, locator: &str) -> Result<Arc<dyn BackupClient>, BackupError>;
}

/// The per-mutation replication acknowledgement: every committed log append
/// waits on this before the index is updated.
pub trait ReplicationSink {
    fn replicate(&self, segment_id: u64, entry: &[u8]) -> Result<(), ReplicationError>;
}

/// Replication disabled; single-node operation and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReplication;

impl ReplicationSink for NullReplication {
    fn replicate(&self, _segment_id: u64, _entry: &[u8]) -> Result<(), ReplicationError> {
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("coordinator transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackupError {
    #[error("backup call timed out")]
    Timeout,
    #[error("backup does not hold segment {0}")]
    BadSegmentId(u64),
    #[error("no session for backup locator {0}")]
    UnknownLocator(String),
    #[error("backup transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("backup replication failed: {0}")]
    Failed(String),
}
