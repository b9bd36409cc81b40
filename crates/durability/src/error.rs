//! Error type for the durability crate.

use std::io;

use thiserror::Error;

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while writing, reading, or replaying snapshot files.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot file was missing its EOF marker at close, or a row failed
    /// its CRC check.
    #[error("corrupt snapshot file {path}: {reason}")]
    Corrupt {
        /// Path of the offending file.
        path: String,
        /// Human-readable description of what was wrong.
        reason: String,
    },

    /// A row's lsn was not the next expected value in the dense ascending
    /// sequence the on-disk format requires.
    #[error("non-dense lsn in {path}: expected {expected}, found {found}")]
    NonDenseLsn {
        /// Path of the offending file.
        path: String,
        /// The lsn that should have appeared next.
        expected: u64,
        /// The lsn actually read.
        found: u64,
    },

    /// A row targeted a space belonging to a different storage engine than
    /// the one currently recovering.
    #[error("row for space {space} does not belong to this engine during recovery")]
    CrossEngineRow {
        /// The offending space id.
        space: u32,
    },

    /// An operation was attempted while the recovery state machine was not
    /// in a state that permits it.
    #[error("recovery state machine: {0}")]
    InvalidState(String),
}

impl Error {
    /// Build a [`Error::Corrupt`] for `path` with `reason`.
    pub fn corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
