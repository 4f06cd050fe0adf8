//! Error taxonomy for the migration core.
//!
//! Every variant here is recognizable by identity (`matches!`/`if let`), not
//! by formatting a message and comparing strings: callers that need to branch
//! on "no pending files" vs. "history changed" can do so without parsing
//! anything.

use std::fmt;
use thiserror::Error;

/// First-divergence classification for a corrupted integrity file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumDivergence {
    Added,
    Edited,
    Removed,
}

impl fmt::Display for ChecksumDivergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChecksumDivergence::Added => "added",
            ChecksumDivergence::Edited => "edited",
            ChecksumDivergence::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// The core error taxonomy. `CoreError` is the single error type
/// threaded through directory, planner, executor and lint operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Integrity file mismatch. Carries the first divergence found while
    /// comparing the recorded sum file against the directory's current
    /// contents.
    #[error("checksum mismatch: file {name:?} was {kind} at sum line {line}")]
    Checksum {
        kind: ChecksumDivergence,
        name: String,
        line: usize,
    },

    /// The sum file is missing entirely. Distinct from `Checksum` so callers
    /// can treat a fresh directory as "uninitialized" rather than corrupt.
    #[error("integrity file not found; directory is uninitialized")]
    MissingSumFile,

    /// A specific file failed to parse or execute.
    #[error("file {name:?} failed{}: {source}", pos.map(|p| format!(" at byte {p}")).unwrap_or_default())]
    File {
        name: String,
        pos: Option<usize>,
        #[source]
        source: Box<CoreError>,
    },

    /// Driver-reported failure, wrapped with no loss of the original message.
    #[error("driver error: {0}")]
    Driver(String),

    /// The target database was not empty when a clean start was required.
    #[error("target database is not clean: {reason}")]
    NotClean { reason: String },

    /// A previously applied file's contents changed since it was recorded.
    #[error(
        "history changed for version {version}: recorded hash {expected}, current hash {actual}"
    )]
    HistoryChanged {
        version: String,
        expected: String,
        actual: String,
    },

    /// The driver lacks the `Locker` capability.
    #[error("driver does not support advisory locking")]
    LockUnsupported,

    /// A lock could not be acquired within the requested timeout.
    #[error("lock {name:?} is held by another process")]
    LockUnavailable { name: String },

    /// The driver lacks the `Snapshoter` capability.
    #[error("driver does not support snapshot/restore")]
    SnapshotUnsupported,

    /// The driver lacks the `CleanChecker` capability.
    #[error("driver does not support clean-state checks")]
    CleanCheckUnsupported,

    /// Desired state equals current state: nothing to plan. Sentinel, not a
    /// failure.
    #[error("no schema changes to plan")]
    NoPlan,

    /// `apply` was invoked with nothing pending. Sentinel, not a failure.
    #[error("no pending migration files")]
    NoPendingFiles,

    /// Wraps an error that has already been reported to the user (e.g. by
    /// the lint pipeline's report writer); callers must set a non-zero exit
    /// without printing again.
    #[error("{0}")]
    Silent(String),

    /// A target bound to a single schema cannot accept a multi-schema
    /// desired state.
    #[error("cannot use multi-schema desired state with a schema-scoped connection")]
    MultiSchemaOnScopedConnection,

    /// A named file does not exist in the directory store.
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid utf-8 in file {name:?}: {source}")]
    Utf8 {
        name: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("{0}")]
    Other(String),
}

impl CoreError {
    pub fn file(name: impl Into<String>, pos: Option<usize>, source: CoreError) -> Self {
        CoreError::File {
            name: name.into(),
            pos,
            source: Box::new(source),
        }
    }

    /// True for the two sentinel "nothing to do" variants (`NoPlan`,
    /// `NoPendingFiles`) that callers usually want to treat as success.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, CoreError::NoPlan | CoreError::NoPendingFiles)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
