//! Snapshot read-view tracking and the checkpoint state machine sitting
//! between the allocator (`duskdb-storage`) and the on-disk snapshot format
//! (`duskdb-durability`).

#![warn(missing_docs)]

pub mod checkpoint;
pub mod snapshot;

pub use checkpoint::{
    run_checkpoint_job, spawn_checkpoint_writer, touch_only_required, CheckpointCoordinator,
    CheckpointError, CheckpointJob, CheckpointState,
};
pub use snapshot::{SnapshotHandle, SnapshotRegistry};
