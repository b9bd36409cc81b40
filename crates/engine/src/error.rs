//! Errors surfaced by the engine facade's vtable operations.
//!
//! Grounded on `crates/core/src/error.rs`'s pattern of one `thiserror` enum
//! per crate, with `#[from]` conversions pulling in each collaborator
//! crate's own error type rather than re-deriving their variants.

use std::io;

use thiserror::Error;

/// Result alias used throughout the engine facade.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the engine facade can return. Fatal invariant violations (a
/// corrupt snapshot, a failed checkpoint rename, a failed rollback) are not
/// represented here — per spec, those terminate the process via `panic!`
/// at the call site instead of being threaded through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// The checkpoint state machine rejected a transition, or its writer
    /// job failed.
    #[error(transparent)]
    Checkpoint(#[from] duskdb_concurrency::CheckpointError),

    /// The recovery state machine rejected a transition, or a snapshot
    /// file failed to read.
    #[error(transparent)]
    Durability(#[from] duskdb_durability::Error),

    /// A collaborator-surfaced allocator or tuple error.
    #[error(transparent)]
    Core(#[from] duskdb_core::Error),

    /// I/O error from a facade-level operation (backup, directory setup).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `join` was called with no checkpoint writer currently running.
    #[error("no checkpoint writer is currently running")]
    NoCheckpointInFlight,

    /// `backup` found no committed snapshot file to copy.
    #[error("no committed snapshot exists to back up")]
    NoSnapshotToBackup,
}
