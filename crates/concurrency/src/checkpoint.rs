//! Checkpoint state machine and the dedicated writer thread that turns a
//! frozen snapshot generation into a durability-crate snapshot file.
//!
//! A small state holder guarding a builder-fed write job, plus a
//! write-off-thread pattern for the actual I/O.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use duskdb_core::{SpaceId, Vclock};
use duskdb_storage::SmallAlloc;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::snapshot::{SnapshotHandle, SnapshotRegistry};

/// `NONE -> BEGUN -> WAITING -> COMMITTED | ABORTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointState {
    /// No checkpoint in flight; a new one may begin.
    None,
    /// The generation to checkpoint has been frozen and the writer thread
    /// may be started.
    Begun,
    /// The caller is waiting for the writer thread to finish.
    Waiting,
    /// The writer thread finished and its file was committed to disk.
    Committed,
    /// The checkpoint was abandoned; any partial file is left for recovery
    /// to discard.
    Aborted,
}

/// Errors from the checkpoint state machine or its writer job.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// An operation was attempted from a state that does not permit it.
    #[error("invalid checkpoint transition from {from:?} via {attempted}")]
    InvalidTransition {
        /// The state the coordinator was actually in.
        from: CheckpointState,
        /// The operation that was attempted.
        attempted: &'static str,
    },

    /// The durability crate's writer/reader layer failed.
    #[error(transparent)]
    Durability(#[from] duskdb_durability::Error),

    /// A snapshot iterator supplied by an index failed mid-scan.
    #[error(transparent)]
    Source(#[from] duskdb_core::Error),

    /// The writer thread observed a cancellation request (shutdown-time
    /// `cancel()`) and stopped before finishing the file.
    #[error("checkpoint write cancelled")]
    Cancelled,
}

type Result<T> = std::result::Result<T, CheckpointError>;

/// Drives one storage directory's checkpoint lifecycle. Does not itself run
/// the write job — see [`run_checkpoint_job`] — it only guards the state
/// transitions and toggles the allocator's delayed-free mode around them.
pub struct CheckpointCoordinator {
    state: Mutex<CheckpointState>,
    alloc: Arc<SmallAlloc>,
    registry: SnapshotRegistry,
    cancel: Arc<AtomicBool>,
}

impl CheckpointCoordinator {
    /// Build a coordinator over `alloc`'s delayed-free mode and `registry`'s
    /// open-generation tracking.
    pub fn new(alloc: Arc<SmallAlloc>, registry: SnapshotRegistry) -> Self {
        CheckpointCoordinator {
            state: Mutex::new(CheckpointState::None),
            alloc,
            registry,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state.
    pub fn state(&self) -> CheckpointState {
        *self.state.lock()
    }

    /// Token the writer thread should poll to notice a shutdown-time
    /// [`CheckpointCoordinator::cancel`] request. Clone into the
    /// [`CheckpointJob`] passed to [`spawn_checkpoint_writer`].
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Begin a checkpoint at `generation`: freezes the allocator into
    /// delayed-free mode and opens a snapshot handle pinning `generation`
    /// open for the duration of the write. Allowed from `None`, `Committed`,
    /// or `Aborted`.
    #[instrument(skip(self))]
    pub fn begin(&self, generation: duskdb_core::Generation) -> Result<SnapshotHandle> {
        let mut state = self.state.lock();
        match *state {
            CheckpointState::None | CheckpointState::Committed | CheckpointState::Aborted => {
                self.cancel.store(false, Ordering::SeqCst);
                self.alloc.enter_delayed_mode();
                let handle = self.registry.open(generation);
                *state = CheckpointState::Begun;
                info!(generation = generation.0, "checkpoint begun");
                Ok(handle)
            }
            other => Err(CheckpointError::InvalidTransition {
                from: other,
                attempted: "begin",
            }),
        }
    }

    /// Move from `Begun` to `Waiting`, signaling the writer thread may now
    /// be awaited.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != CheckpointState::Begun {
            return Err(CheckpointError::InvalidTransition {
                from: *state,
                attempted: "wait",
            });
        }
        *state = CheckpointState::Waiting;
        Ok(())
    }

    /// Commit: the writer thread finished successfully. Leaves delayed-free
    /// mode, releasing every tuple queued while the checkpoint was running.
    #[instrument(skip(self))]
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != CheckpointState::Waiting {
            return Err(CheckpointError::InvalidTransition {
                from: *state,
                attempted: "commit",
            });
        }
        self.alloc.leave_delayed_mode();
        *state = CheckpointState::Committed;
        info!("checkpoint committed");
        Ok(())
    }

    /// Abort from `Begun` or `Waiting`. Also leaves delayed-free mode, since
    /// an aborted checkpoint no longer needs the frozen generation.
    #[instrument(skip(self))]
    pub fn abort(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            CheckpointState::Begun | CheckpointState::Waiting => {
                self.alloc.leave_delayed_mode();
                *state = CheckpointState::Aborted;
                info!("checkpoint aborted");
                Ok(())
            }
            other => Err(CheckpointError::InvalidTransition {
                from: other,
                attempted: "abort",
            }),
        }
    }

    /// Shutdown-time cancellation: signal the writer thread's cancel token
    /// and transition as [`CheckpointCoordinator::abort`] does. The caller
    /// is still responsible for joining the writer's `JoinHandle` before
    /// tearing down the iterators it was reading from.
    #[instrument(skip(self))]
    pub fn cancel(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            CheckpointState::Begun | CheckpointState::Waiting => {
                self.cancel.store(true, Ordering::SeqCst);
                self.alloc.leave_delayed_mode();
                *state = CheckpointState::Aborted;
                info!("checkpoint cancelled at shutdown");
                Ok(())
            }
            other => Err(CheckpointError::InvalidTransition {
                from: other,
                attempted: "cancel",
            }),
        }
    }
}

/// Whether `dir` already holds a committed snapshot file at `vclock`'s
/// signature — if so, `wait()` should mark the checkpoint touch-only rather
/// than rewrite an identical file.
pub fn touch_only_required(dir: &Path, vclock: &Vclock) -> bool {
    duskdb_durability::paths::final_path(dir, vclock).exists()
}

/// Everything the writer thread needs to turn a frozen generation into a
/// snapshot file.
pub struct CheckpointJob {
    /// Storage directory snapshot files live under.
    pub dir: PathBuf,
    /// This checkpoint's signature.
    pub vclock: Vclock,
    /// Optional write-rate throttle.
    pub rate_limit: Option<duskdb_durability::RateLimit>,
    /// One snapshot iterator per space to dump, in write order.
    pub sources: Vec<(SpaceId, Box<dyn duskdb_core::SnapshotIterator>)>,
    /// If true, nothing changed since the last checkpoint: skip the full
    /// rewrite and just update the existing file's mtime.
    pub touch_only: bool,
    /// Polled between rows; set by [`CheckpointCoordinator::cancel`] at
    /// shutdown. `None` means this job cannot be cancelled mid-write.
    pub cancel_token: Option<Arc<AtomicBool>>,
}

/// Update a file's modification time without rewriting its contents.
fn touch(path: &std::path::Path) -> std::io::Result<()> {
    File::open(path)?.set_modified(SystemTime::now())
}

/// Run one checkpoint write job to completion, returning the committed
/// file's path. Intended to run on its own OS thread via
/// [`spawn_checkpoint_writer`], separate from the cooperative database
/// task, so a slow disk never stalls foreground work.
#[instrument(skip(job), fields(rows = tracing::field::Empty))]
pub fn run_checkpoint_job(job: CheckpointJob) -> Result<PathBuf> {
    if job.touch_only {
        let path = duskdb_durability::paths::final_path(&job.dir, &job.vclock);
        touch(&path)?;
        info!(path = %path.display(), "checkpoint satisfied by touch-only mtime update");
        return Ok(path);
    }

    let mut writer = duskdb_durability::SnapshotWriter::create(&job.dir, &job.vclock, job.rate_limit)?;
    let mut rows_written: u64 = 0;
    for (space_id, mut iter) in job.sources {
        let mut buf = Vec::new();
        while iter.next(&mut buf)? {
            if let Some(token) = &job.cancel_token {
                if token.load(Ordering::SeqCst) {
                    warn!(rows = rows_written, "checkpoint write cancelled mid-scan");
                    writer.abort();
                    return Err(CheckpointError::Cancelled);
                }
            }
            writer.write_row(space_id, std::mem::take(&mut buf))?;
            rows_written += 1;
        }
    }

    // A rename failure here means the file is durably written but cannot be
    // made visible under its final name — treated as a fatal invariant
    // violation, not a recoverable error.
    let path = writer
        .close()
        .unwrap_or_else(|e| panic!("checkpoint commit rename failed, fatal: {e}"));
    tracing::Span::current().record("rows", rows_written);
    Ok(path)
}

/// Spawn [`run_checkpoint_job`] on its own OS thread.
pub fn spawn_checkpoint_writer(job: CheckpointJob) -> JoinHandle<Result<PathBuf>> {
    thread::spawn(move || run_checkpoint_job(job))
}
