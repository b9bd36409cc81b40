//! Core types and collaborator contracts for the duskdb storage engine.
//!
//! This crate defines the vocabulary shared by every other crate in the
//! workspace:
//! - [`Generation`]: the monotonic snapshot-generation counter stamped into
//!   every tuple at allocation time.
//! - [`SpaceId`] / [`IndexId`]: identifiers for spaces and their indexes.
//! - [`ReplaceBehavior`]: drives the recovery state machine and rollback
//!   code paths.
//! - [`IndexDef`] / [`IndexPart`]: an index's structural definition, and the
//!   [`index_def_requires_rebuild`] rule deciding whether a definition
//!   change can be absorbed in place.
//! - [`Vclock`]: the vector-clock signature identifying a checkpoint.
//! - Collaborator traits ([`Index`], [`SnapshotIterator`], [`GcTask`]) that
//!   the index/transaction layers living outside this crate implement.
//! - [`Error`] / [`Result`]: the shared error type.

#![warn(missing_docs)]

pub mod error;
pub mod limits;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use traits::{GcTask, Index, ReplaceOutcome, SnapshotIterator, Transaction};
pub use types::{
    index_def_requires_rebuild, Collation, Generation, IndexDef, IndexId, IndexPart, IndexType,
    ReplaceBehavior, SpaceId, Vclock,
};
