//! The engine facade: the single entry point a surrounding database binds
//! to, exposing `shutdown`, `create_space`, `join`, `begin`,
//! `rollback_statement`, `bootstrap`, `begin_initial_recovery`,
//! `begin_final_recovery`, `end_recovery`, `begin_checkpoint`,
//! `wait_checkpoint`, `commit_checkpoint`, `abort_checkpoint`,
//! `collect_garbage`, `backup`, and `memory_stat`.
//!
//! Grounded on `crates/engine/src/database/mod.rs`'s `Database`: one struct
//! wiring together the layers below it (storage, recovery, checkpoint),
//! exposing a small set of lifecycle methods rather than leaking its
//! internals. As in that struct, every collaborator (`Arena`, `SmallAlloc`,
//! `CheckpointCoordinator`, `RecoveryCoordinator`, `GcWorker`) is built once
//! at construction and held for the engine's lifetime.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use duskdb_concurrency::checkpoint::{
    spawn_checkpoint_writer, touch_only_required, CheckpointCoordinator, CheckpointError,
    CheckpointJob, CheckpointState,
};
use duskdb_concurrency::snapshot::{SnapshotHandle, SnapshotRegistry};
use duskdb_core::{Generation, Index, ReplaceBehavior, SnapshotIterator, SpaceId, Vclock};
use duskdb_durability::{paths, RecoveryCoordinator, RecoveryState};
use duskdb_storage::{Arena, ExtentPool, FormatRegistry, SmallAlloc, TupleFactory};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::gc::{GcStep, GcWorker};
use crate::rollback::{self, TupleHandle};

/// A point-in-time snapshot of the engine's memory usage: arena bytes in
/// use versus each arena's configured ceiling.
#[derive(Debug, Clone, Copy)]
pub struct MemoryStat {
    /// Bytes currently charged against the tuple arena's quota.
    pub tuple_bytes_used: usize,
    /// The tuple arena's configured ceiling.
    pub tuple_bytes_max: usize,
    /// Bytes currently charged against the extent arena's quota.
    pub extent_bytes_used: usize,
    /// The extent arena's configured ceiling.
    pub extent_bytes_max: usize,
}

type WriterResult = std::result::Result<PathBuf, CheckpointError>;

/// The storage engine instance. Owns the tuple arena, allocator, extent
/// pool, checkpoint and recovery state machines, and the GC worker; wires
/// them together leaf-first.
pub struct Engine {
    config: EngineConfig,
    tuple_arena: Arc<Arena>,
    extent_arena: Arc<Arena>,
    alloc: Arc<SmallAlloc>,
    extents: ExtentPool,
    tuples: TupleFactory,
    snapshot_registry: SnapshotRegistry,
    checkpoint: CheckpointCoordinator,
    recovery: Mutex<RecoveryCoordinator>,
    gc: Arc<GcWorker>,
    spaces: Arc<Mutex<BTreeSet<SpaceId>>>,
    checkpoint_handle: Mutex<Option<SnapshotHandle>>,
    pending_sources: Mutex<Option<Vec<(SpaceId, Box<dyn SnapshotIterator>)>>>,
    writer_handle: Mutex<Option<JoinHandle<WriterResult>>>,
    last_vclock: Mutex<Option<Vclock>>,
}

impl Engine {
    /// Build an engine from `config`. Constructs every layer bottom-up:
    /// arenas, allocator, extent pool, then the checkpoint and recovery
    /// coordinators that sit on top of them.
    pub fn new(config: EngineConfig) -> Self {
        let limits = config.limits();

        let tuple_arena = Arc::new(Arena::new(limits.slab_bytes, config.arena_max_bytes));
        let alloc = Arc::new(SmallAlloc::new(tuple_arena.clone(), limits.clone()));
        let formats = Arc::new(FormatRegistry::new());
        let gc = Arc::new(GcWorker::new());

        let gc_for_retry = gc.clone();
        let tuples = TupleFactory::new(
            alloc.clone(),
            formats,
            limits.clone(),
            Box::new(move || !matches!(gc_for_retry.run_once(), GcStep::Idle)),
        );

        // The extent pool draws from its own arena, sized to the extent
        // granularity rather than the tuple slab size. This crate's `Arena`
        // binds one slab size per instance, so the two slab caches become
        // two arenas sharing the same configured ceiling rather than one
        // literal shared quota — see DESIGN.md.
        let extent_arena = Arc::new(Arena::new(limits.extent_bytes, config.arena_max_bytes));
        let extents = ExtentPool::new(extent_arena.clone());

        let snapshot_registry = SnapshotRegistry::new();
        let checkpoint = CheckpointCoordinator::new(alloc.clone(), snapshot_registry.clone());

        let spaces: Arc<Mutex<BTreeSet<SpaceId>>> = Arc::new(Mutex::new(BTreeSet::new()));
        let spaces_for_recovery = spaces.clone();
        let recovery = Mutex::new(RecoveryCoordinator::new(
            config.snapshot_dir.clone(),
            move |id| spaces_for_recovery.lock().contains(&id),
            config.force_recovery,
        ));

        Engine {
            config,
            tuple_arena,
            extent_arena,
            alloc,
            extents,
            tuples,
            snapshot_registry,
            checkpoint,
            recovery,
            gc,
            spaces,
            checkpoint_handle: Mutex::new(None),
            pending_sources: Mutex::new(None),
            writer_handle: Mutex::new(None),
            last_vclock: Mutex::new(None),
        }
    }

    /// Configuration this engine was built from.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared tuple factory, for an embedding layer's DML path to
    /// allocate/drop tuples through. Tuple allocation itself is not one of
    /// the engine's own vtable operations; this accessor is how the
    /// surrounding DML layer reaches the factory the engine otherwise owns
    /// privately.
    pub fn tuple_factory(&self) -> &TupleFactory {
        &self.tuples
    }

    /// The shared extent pool, for an embedding layer's index implementations.
    pub fn extent_pool(&self) -> &ExtentPool {
        &self.extents
    }

    /// Current checkpoint state machine position.
    pub fn checkpoint_state(&self) -> CheckpointState {
        self.checkpoint.state()
    }

    /// Current recovery state machine position.
    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.lock().state()
    }

    /// Register a space as owned by this engine instance, so recovery
    /// replay accepts rows targeting it.
    pub fn create_space(&self, id: SpaceId) {
        self.spaces.lock().insert(id);
        info!(space = %id, "space registered with engine");
    }

    /// Open a read-view pinned at the engine's current snapshot generation,
    /// for a transaction to hold for its duration.
    pub fn begin(&self) -> SnapshotHandle {
        self.snapshot_registry.open(self.tuples.current_generation())
    }

    /// Undo one statement's effect across `indexes`, panicking if the space
    /// is still mid-snapshot-recovery or an index fails to restore the
    /// prior tuple.
    pub fn rollback_statement<T: TupleHandle>(
        &self,
        indexes: &mut [&mut dyn Index<Tuple = T>],
        old: T,
        new: T,
        behavior: ReplaceBehavior,
    ) {
        let recovering = matches!(self.recovery_state(), RecoveryState::InitialRecovery);
        rollback::rollback_statement(indexes, old, new, behavior, recovering);
    }

    /// Fresh-directory fast path: see [`RecoveryCoordinator::bootstrap`].
    pub fn bootstrap(&self) -> Result<bool> {
        Ok(self.recovery.lock().bootstrap()?)
    }

    /// Replay the most recent snapshot into `on_row`. See
    /// [`RecoveryCoordinator::begin_initial_recovery`]. The caller is
    /// responsible for end-building each space's primary index and
    /// flipping its replace behavior to primary-only once this returns.
    pub fn begin_initial_recovery(
        &self,
        on_row: impl FnMut(SpaceId, Vec<u8>) -> duskdb_durability::Result<()>,
        yield_point: impl FnMut(),
    ) -> Result<()> {
        Ok(self
            .recovery
            .lock()
            .begin_initial_recovery(on_row, yield_point)?)
    }

    /// `INITIAL_RECOVERY -> FINAL_RECOVERY`. See
    /// [`RecoveryCoordinator::begin_final_recovery`].
    pub fn begin_final_recovery(&self) -> Result<()> {
        Ok(self.recovery.lock().begin_final_recovery()?)
    }

    /// `FINAL_RECOVERY -> OK`, collecting stale `.inprogress` files. See
    /// [`RecoveryCoordinator::end_recovery`].
    pub fn end_recovery(&self) -> Result<Vec<PathBuf>> {
        Ok(self.recovery.lock().end_recovery()?)
    }

    /// Begin a checkpoint: advance the snapshot generation, enter delayed
    /// free mode, and pin a read-view over it. `sources` is the ordered
    /// list of per-space snapshot iterators the embedding layer has already
    /// opened over each space's primary index.
    #[instrument(skip(self, sources))]
    pub fn begin_checkpoint(
        &self,
        sources: Vec<(SpaceId, Box<dyn SnapshotIterator>)>,
    ) -> Result<Generation> {
        let generation = self.tuples.advance_generation();
        let handle = self.checkpoint.begin(generation)?;
        *self.checkpoint_handle.lock() = Some(handle);
        *self.pending_sources.lock() = Some(sources);
        self.gc.set_checkpoint_in_flight(true);
        Ok(generation)
    }

    /// Start the writer thread and cooperatively block until it joins.
    /// Enters touch-only mode if a committed snapshot already exists at
    /// `vclock`'s signature.
    #[instrument(skip(self))]
    pub fn wait_checkpoint(&self, vclock: Vclock) -> Result<PathBuf> {
        self.checkpoint.wait()?;
        let touch_only = touch_only_required(&self.config.snapshot_dir, &vclock);
        let sources = self.pending_sources.lock().take().unwrap_or_default();
        let job = CheckpointJob {
            dir: self.config.snapshot_dir.clone(),
            vclock: vclock.clone(),
            rate_limit: self.config.rate_limit(),
            sources,
            touch_only,
            cancel_token: Some(self.checkpoint.cancel_token()),
        };
        *self.last_vclock.lock() = Some(vclock);
        *self.writer_handle.lock() = Some(spawn_checkpoint_writer(job));
        self.join()
    }

    /// Block until the writer thread spawned by [`Engine::wait_checkpoint`]
    /// finishes, returning its result. A thread panic (e.g. the writer's
    /// fatal rename-failure panic) is re-raised rather than swallowed.
    pub fn join(&self) -> Result<PathBuf> {
        let handle = self.writer_handle.lock().take();
        match handle {
            Some(handle) => match handle.join() {
                Ok(result) => Ok(result?),
                Err(panic) => std::panic::resume_unwind(panic),
            },
            None => Err(Error::NoCheckpointInFlight),
        }
    }

    /// Leave delayed free mode and register the new snapshot file, draining
    /// any GC tasks withheld while the checkpoint was in flight.
    #[instrument(skip(self))]
    pub fn commit_checkpoint(&self) -> Result<()> {
        self.checkpoint.commit()?;
        self.gc.set_checkpoint_in_flight(false);
        self.checkpoint_handle.lock().take();
        let drained = self.gc.drain_to_free();
        info!(drained, "checkpoint committed, gc drain complete");
        Ok(())
    }

    /// Abandon the in-flight checkpoint: join the writer thread if still
    /// running, leave delayed mode, and best-effort unlink the
    /// `.inprogress` file it may have left behind.
    #[instrument(skip(self))]
    pub fn abort_checkpoint(&self) -> Result<()> {
        if let Some(handle) = self.writer_handle.lock().take() {
            if handle.join().is_err() {
                warn!("checkpoint writer thread panicked during abort");
            }
        }
        self.checkpoint.abort()?;
        self.gc.set_checkpoint_in_flight(false);
        self.checkpoint_handle.lock().take();

        if let Some(vclock) = self.last_vclock.lock().take() {
            let inprogress = paths::inprogress_path(&self.config.snapshot_dir, &vclock);
            if let Err(e) = fs::remove_file(&inprogress) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %inprogress.display(), error = %e, "best-effort unlink of in-progress snapshot failed");
                }
            }
        }
        Ok(())
    }

    /// Signal a shutdown-time abort of any in-flight checkpoint, joining
    /// the writer thread before returning.
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> Result<()> {
        let state = self.checkpoint.state();
        if matches!(state, CheckpointState::Begun | CheckpointState::Waiting) {
            warn!("shutdown requested with a checkpoint in flight; cancelling");
            self.checkpoint.cancel()?;
            if let Some(handle) = self.writer_handle.lock().take() {
                let _ = handle.join();
            }
            self.gc.set_checkpoint_in_flight(false);
            self.checkpoint_handle.lock().take();
        }
        info!("engine shutdown complete");
        Ok(())
    }

    /// Enqueue a retired index structure's incremental teardown (e.g. a
    /// dropped secondary index's extents).
    pub fn schedule_gc_task(&self, task: Box<dyn duskdb_core::GcTask>) {
        self.gc.schedule(task);
    }

    /// Run one unit of GC work. Intended to be called repeatedly by the
    /// cooperative database task whenever it is otherwise idle.
    pub fn collect_garbage(&self) -> GcStep {
        self.gc.run_once()
    }

    /// Copy the most recently committed snapshot file into `dest_dir`.
    #[instrument(skip(self))]
    pub fn backup(&self, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dest_dir = dest_dir.as_ref();
        fs::create_dir_all(dest_dir)?;
        let latest =
            latest_committed_snapshot(&self.config.snapshot_dir)?.ok_or(Error::NoSnapshotToBackup)?;
        let file_name = latest
            .file_name()
            .expect("a discovered snapshot path always has a file name");
        let dest = dest_dir.join(file_name);
        fs::copy(&latest, &dest)?;
        fs::File::open(dest_dir)?.sync_all()?;
        info!(from = %latest.display(), to = %dest.display(), "snapshot backed up");
        Ok(dest)
    }

    /// A point-in-time snapshot of arena memory usage.
    pub fn memory_stat(&self) -> MemoryStat {
        MemoryStat {
            tuple_bytes_used: self.tuple_arena.used_bytes(),
            tuple_bytes_max: self.tuple_arena.max_bytes(),
            extent_bytes_used: self.extent_arena.used_bytes(),
            extent_bytes_max: self.extent_arena.max_bytes(),
        }
    }
}

/// Pick the most recently modified committed (non-`.inprogress`) snapshot
/// file, mirroring the selection rule `begin_initial_recovery` uses.
fn latest_committed_snapshot(dir: &Path) -> Result<Option<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if paths::is_inprogress(&path) {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("snapshot") {
            continue;
        }
        let mtime = entry.metadata()?.modified()?;
        candidates.push((path, mtime));
    }
    candidates.sort_by_key(|(_, mtime)| std::cmp::Reverse(*mtime));
    Ok(candidates.into_iter().next().map(|(path, _)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use duskdb_core::Error as CoreError;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn config_in(dir: &Path) -> EngineConfig {
        EngineConfig {
            snapshot_dir: dir.to_path_buf(),
            ..EngineConfig::default()
        }
    }

    struct EmptyIterator;
    impl SnapshotIterator for EmptyIterator {
        fn next(&mut self, _out: &mut Vec<u8>) -> std::result::Result<bool, CoreError> {
            Ok(false)
        }
    }

    #[test]
    fn bootstrap_on_fresh_engine_reaches_ok() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config_in(dir.path()));
        assert!(engine.bootstrap().unwrap());
        assert_eq!(engine.recovery_state(), RecoveryState::Ok);
    }

    #[test]
    fn begin_returns_a_read_view_at_the_current_generation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config_in(dir.path()));
        let handle = engine.begin();
        assert_eq!(handle.generation(), Generation::INITIAL);
    }

    #[test]
    fn duplicate_signature_commit_is_idempotent_via_touch_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config_in(dir.path()));
        engine.bootstrap().unwrap();
        let vclock = Vclock::new(vec![(0, 1)]);

        engine
            .begin_checkpoint(vec![(SpaceId(1), Box::new(EmptyIterator))])
            .unwrap();
        let first_path = engine.wait_checkpoint(vclock.clone()).unwrap();
        engine.commit_checkpoint().unwrap();
        let before = fs::read(&first_path).unwrap();

        engine.begin_checkpoint(vec![]).unwrap();
        let second_path = engine.wait_checkpoint(vclock).unwrap();
        engine.commit_checkpoint().unwrap();

        assert_eq!(first_path, second_path);
        assert_eq!(before, fs::read(&second_path).unwrap());
    }

    #[test]
    fn abort_leaves_no_inprogress_file_and_resets_allocator_mode() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config_in(dir.path()));
        engine.bootstrap().unwrap();
        let vclock = Vclock::new(vec![(0, 1)]);

        // Abort straight from `Begun`, before the writer thread is ever
        // started.
        engine.begin_checkpoint(vec![]).unwrap();
        engine.abort_checkpoint().unwrap();

        assert_eq!(engine.checkpoint_state(), CheckpointState::Aborted);
        assert_eq!(engine.alloc.mode(), duskdb_storage::FreeMode::Immediate);
        assert!(!paths::final_path(dir.path(), &vclock).exists());
        assert!(!paths::inprogress_path(dir.path(), &vclock).exists());

        // A subsequent checkpoint still succeeds.
        engine.begin_checkpoint(vec![]).unwrap();
        engine.wait_checkpoint(vclock).unwrap();
        engine.commit_checkpoint().unwrap();
        assert_eq!(engine.checkpoint_state(), CheckpointState::Committed);
    }

    struct StepOnceTask {
        freed: Arc<AtomicBool>,
    }

    impl duskdb_core::GcTask for StepOnceTask {
        fn step(&mut self) -> bool {
            true
        }
        fn free(self: Box<Self>) {
            self.freed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn gc_task_completed_during_checkpoint_is_deferred_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config_in(dir.path()));
        engine.bootstrap().unwrap();

        engine.begin_checkpoint(vec![]).unwrap();
        let freed = Arc::new(AtomicBool::new(false));
        engine.schedule_gc_task(Box::new(StepOnceTask { freed: freed.clone() }));

        assert_eq!(engine.collect_garbage(), GcStep::Completed);
        assert!(!freed.load(Ordering::SeqCst));

        engine.wait_checkpoint(Vclock::new(vec![(0, 1)])).unwrap();
        engine.commit_checkpoint().unwrap();
        assert!(freed.load(Ordering::SeqCst));
    }

    #[test]
    fn backup_copies_latest_committed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config_in(dir.path()));
        engine.bootstrap().unwrap();
        engine.begin_checkpoint(vec![]).unwrap();
        let path = engine.wait_checkpoint(Vclock::new(vec![(0, 1)])).unwrap();
        engine.commit_checkpoint().unwrap();

        let backup_dir = tempfile::tempdir().unwrap();
        let backed_up = engine.backup(backup_dir.path()).unwrap();
        assert_eq!(fs::read(&backed_up).unwrap(), fs::read(&path).unwrap());
    }

    #[test]
    fn memory_stat_reports_zero_for_a_fresh_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(config_in(dir.path()));
        let stat = engine.memory_stat();
        assert_eq!(stat.tuple_bytes_used, 0);
        assert_eq!(stat.extent_bytes_used, 0);
        assert!(stat.tuple_bytes_max > 0);
    }
}
