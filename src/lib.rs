//! Master storage node of a distributed in-memory key-value store.
//!
//! A master owns tablets (object-id ranges within tables) and serves the
//! versioned create/read/write/remove protocol over them. Every mutation is
//! appended to a segmented log and replicated to backup peers; when a master
//! fails, a surviving master recovers its partition by replaying log segments
//! fetched from those backups.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, warn(missing_docs))]

pub mod cluster;
pub mod config;
pub mod error;
pub mod index;
pub mod log;
pub mod master;
pub mod tablet;
pub mod wire;

pub use cluster::{
    BackupClient, BackupConnector, BackupError, BackupListEntry, CoordinatorClient,
    CoordinatorError, NullReplication, ReplicationError, ReplicationSink, ServerKind,
};
pub use config::{ConfigError, MasterConfig};
pub use error::{InternalError, MasterError};
pub use index::{EntryTag, IndexEntry, ObjectIndex, ObjectKey};
pub use crate::log::entry::{
    EntryError, EntryType, ObjectRecord, SegmentFooter, SegmentHeader, Tombstone, SEGMENT_MAGIC,
};
pub use crate::log::segment::{Segment, SegmentError, SegmentReader};
pub use crate::log::{Log, LogError, LogRef};
pub use master::recovery::{RecoveryError, ReplayStats, SegmentReplayError};
pub use master::{MasterContext, MasterService};
pub use tablet::{Table, Tablet, TabletConfigError, TabletSpec, TabletState, TabletTable};
pub use wire::{RejectRules, WireError, VERSION_NONEXISTENT};
