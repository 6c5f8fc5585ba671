use std::fmt;

use thiserror::Error;
use zfs_io::{CommandError, PipelineError, ZfsFailure};

use crate::exit_code::{ExitCode, HasExitCode};

/// Why the engine refused to continue without operator action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyReason {
    /// Both sides have snapshots but none share a GUID.
    NoCommonSnapshot,
    /// The destination holds snapshots newer than the common base that the
    /// source has never seen.
    DestinationAhead,
    /// The destination exists without snapshots and reuse was requested
    /// without permission to overwrite it.
    EmptyExistingDestination,
    /// Resuming an interrupted receive failed because the destination was
    /// modified; no setting unblocks this.
    DestinationModifiedDuringResume,
}

impl PolicyReason {
    /// Name of the setting that would let the run proceed, if any.
    #[must_use]
    pub const fn unblock_flag(self) -> Option<&'static str> {
        match self {
            Self::NoCommonSnapshot | Self::DestinationAhead | Self::EmptyExistingDestination => {
                Some("allowOverwrite")
            }
            Self::DestinationModifiedDuringResume => None,
        }
    }

    const fn summary(self) -> &'static str {
        match self {
            Self::NoCommonSnapshot => "source and destination share no common snapshot",
            Self::DestinationAhead => {
                "destination has snapshots newer than the common base that are not on the source"
            }
            Self::EmptyExistingDestination => {
                "destination dataset already exists without snapshots"
            }
            Self::DestinationModifiedDuringResume => {
                "resume failed because the destination was modified since its most recent snapshot"
            }
        }
    }
}

impl fmt::Display for PolicyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.summary())?;
        match self.unblock_flag() {
            Some(flag) => write!(f, "; set {flag} to replace the destination"),
            None => f.write_str("; roll back or repair the destination manually"),
        }
    }
}

/// Errors produced by a replication run.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Invalid or missing configuration, detected before any command runs.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The run would need a destructive action the task does not allow.
    #[error("refusing to replicate {dataset}: {reason}")]
    Policy {
        /// Why the run stopped.
        reason: PolicyReason,
        /// Destination dataset concerned.
        dataset: String,
    },

    /// A transfer pipeline stage failed.
    #[error("transfer failed in {stage}: {message}")]
    Transport {
        /// Label of the stage the failure is attributed to.
        stage: String,
        /// Captured diagnostic text.
        message: String,
        /// Classification of the captured text.
        failure: ZfsFailure,
    },

    /// A storage command failed.
    #[error("{operation} failed for {target}: {source}")]
    Zfs {
        /// Operation being performed (`list`, `snapshot`, `get`, ...).
        operation: &'static str,
        /// Dataset or snapshot the command addressed.
        target: String,
        /// Underlying command failure.
        #[source]
        source: CommandError,
    },

    /// The storage tool printed output this crate could not interpret.
    #[error("unexpected output from {operation} for {target}: {detail}")]
    Parse {
        /// Operation whose output was parsed.
        operation: &'static str,
        /// Dataset or snapshot the command addressed.
        target: String,
        /// Description of the offending output.
        detail: String,
    },

    /// The source dataset does not exist.
    #[error("source dataset {0} does not exist")]
    SourceMissing(String),

    /// The pool holding the snapshot has no free space left.
    #[error("no free space available on {0}")]
    NoSpace(String),

    /// A snapshot with this run's name already sits on the destination.
    #[error("snapshot {snapshot} already exists on destination {dataset}")]
    NameCollision {
        /// Destination dataset.
        dataset: String,
        /// Colliding snapshot name.
        snapshot: String,
    },

    /// Deleting an expired snapshot failed; pruning stops at the first error.
    #[error("failed to prune {snapshot}: {source}")]
    Prune {
        /// Snapshot that could not be destroyed.
        snapshot: String,
        /// Underlying failure.
        #[source]
        source: Box<ReplicationError>,
    },

    /// The transfer reported success but the snapshot is not on the
    /// destination.
    #[error("snapshot {snapshot} was not found on {dataset} after the transfer")]
    Verification {
        /// Destination dataset.
        dataset: String,
        /// Snapshot expected on the destination.
        snapshot: String,
    },
}

impl ReplicationError {
    /// Wraps a storage command failure.
    pub fn zfs(operation: &'static str, target: impl Into<String>, source: CommandError) -> Self {
        Self::Zfs {
            operation,
            target: target.into(),
            source,
        }
    }

    /// Classification of the underlying storage failure, if any.
    #[must_use]
    pub fn failure(&self) -> ZfsFailure {
        match self {
            Self::Transport { failure, .. } => *failure,
            Self::Zfs { source, .. } => source.failure(),
            Self::Prune { source, .. } => source.failure(),
            _ => ZfsFailure::Other,
        }
    }

    /// The policy reason when this is a refusal.
    #[must_use]
    pub const fn policy_reason(&self) -> Option<PolicyReason> {
        match self {
            Self::Policy { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<PipelineError> for ReplicationError {
    fn from(err: PipelineError) -> Self {
        Self::Transport {
            stage: err.stage().to_owned(),
            failure: err.failure(),
            message: err.to_string(),
        }
    }
}

impl HasExitCode for ReplicationError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Policy { .. } => ExitCode::PolicyRefusal,
            _ => ExitCode::Failure,
        }
    }
}
