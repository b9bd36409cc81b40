//! Collaborator contracts the allocator and checkpoint layers depend on but
//! do not implement themselves: indexes, snapshot cursors, and background
//! GC steps.
//!
//! These mirror the "memtx_index"/"memtx_gc_task" vtables a storage engine
//! sits next to without owning: index implementations, snapshot iteration,
//! and incremental garbage collection are all supplied by the caller.

use crate::types::{Generation, IndexDef};

/// What happened to the previous tuple occupying a key when `Index::replace`
/// is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// No tuple previously occupied this key; the new tuple was inserted.
    Inserted,
    /// A tuple previously occupied this key and was displaced by the new one.
    /// The caller is responsible for deferring its free until it is no
    /// longer visible to any in-flight snapshot.
    Displaced,
}

/// An index over tuples belonging to one space.
///
/// Implementations live outside this crate; this trait only names the
/// surface the allocator and recovery state machine call into.
pub trait Index {
    /// Opaque tuple handle this index stores and returns.
    type Tuple;

    /// Begin a bulk build of this index (used during initial snapshot
    /// recovery). No reads are expected to be served against the index
    /// until [`Index::end_build`] is called.
    fn build(&mut self);

    /// Finish a bulk build, making the index queryable.
    fn end_build(&mut self);

    /// Insert `new`, displacing whatever previously occupied its key if
    /// `allow_replace` is true. Returns whether a tuple was displaced and,
    /// if so, its old handle so the caller can schedule it for a delayed
    /// free once it is provably invisible to all in-flight snapshots.
    fn replace(
        &mut self,
        old: Option<Self::Tuple>,
        new: Self::Tuple,
        allow_replace: bool,
    ) -> (ReplaceOutcome, Option<Self::Tuple>);

    /// Number of tuples currently visible through this index.
    fn size(&self) -> usize;

    /// Open a cursor over this index's contents as of `generation`, for use
    /// by a checkpoint writer.
    fn create_snapshot_iterator(&self, generation: Generation) -> Box<dyn SnapshotIterator>;

    /// This index's current structural definition, compared against a
    /// candidate definition by [`Index::def_change_requires_rebuild`].
    fn def(&self) -> &IndexDef;

    /// Whether replacing this index's definition with `new_def` requires
    /// rebuilding the index from scratch, as opposed to an in-place
    /// reformat. The default implementation defers to
    /// [`crate::types::index_def_requires_rebuild`]; override only if an
    /// implementation can absorb a structural change the generic rule
    /// would otherwise flag.
    fn def_change_requires_rebuild(&self, new_def: &IndexDef) -> bool {
        crate::types::index_def_requires_rebuild(self.def(), new_def)
    }
}

/// A cursor over one index's tuples, frozen at the generation it was opened
/// with. Used by the checkpoint writer to stream a consistent view to disk
/// without blocking concurrent writers.
pub trait SnapshotIterator: Send {
    /// Advance the cursor and copy the next tuple's raw payload into `out`.
    /// Returns `Ok(true)` if a tuple was produced, `Ok(false)` at end of
    /// index.
    fn next(&mut self, out: &mut Vec<u8>) -> crate::error::Result<bool>;
}

/// One incremental step of a longer-running garbage collection job —
/// e.g. freeing a dropped index's extents a few at a time so a single GC
/// step never holds up the cooperative scheduler for long.
pub trait GcTask: Send {
    /// Perform one bounded unit of work. Returns `true` once the task has
    /// no more work left and is ready for [`GcTask::free`].
    fn step(&mut self) -> bool;

    /// Release whatever resources this task was incrementally dropping.
    /// Called once `step` has reported done, or at engine shutdown.
    fn free(self: Box<Self>);
}

/// The transaction manager's surface as seen by recovery replay and
/// rollback. The transaction manager itself — conflict detection,
/// isolation — lives outside this crate; this only names the lifecycle
/// calls made into it.
pub trait Transaction {
    /// Begin a new transaction.
    fn begin(&mut self);

    /// Commit the transaction.
    fn commit(&mut self) -> crate::error::Result<()>;

    /// Roll back the transaction.
    fn rollback(&mut self);
}
