use crate::cluster::{CoordinatorError, ReplicationError};
use crate::log::LogError;
use crate::wire::VERSION_NONEXISTENT;
use thiserror::Error;

/// The closed set of error kinds returned to clients. Rejections carry the
/// key's current version, which the caller uses to retry or reconcile.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("table doesn't exist")]
    TableDoesntExist,
    #[error("object doesn't exist")]
    ObjectDoesntExist { current_version: u64 },
    #[error("object exists (current version {current_version})")]
    ObjectExists { current_version: u64 },
    #[error("wrong version (current version {current_version})")]
    WrongVersion { current_version: u64 },
    #[error("tablet is not serving, retry")]
    Retry,
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl MasterError {
    /// The current version reported alongside a rejection, when there is one.
    pub fn current_version(&self) -> Option<u64> {
        match self {
            MasterError::ObjectDoesntExist { current_version }
            | MasterError::ObjectExists { current_version }
            | MasterError::WrongVersion { current_version } => Some(*current_version),
            _ => None,
        }
    }

    pub(crate) fn object_doesnt_exist() -> Self {
        MasterError::ObjectDoesntExist {
            current_version: VERSION_NONEXISTENT,
        }
    }
}

/// Failures of the master's own machinery, surfaced to clients as `INTERNAL`.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

impl From<LogError> for MasterError {
    fn from(err: LogError) -> Self {
        MasterError::Internal(InternalError::Log(err))
    }
}

impl From<ReplicationError> for MasterError {
    fn from(err: ReplicationError) -> Self {
        MasterError::Internal(InternalError::Replication(err))
    }
}

impl From<CoordinatorError> for MasterError {
    fn from(err: CoordinatorError) -> Self {
        MasterError::Internal(InternalError::Coordinator(err))
    }
}
