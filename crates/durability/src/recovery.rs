//! Recovery state machine: `INITIALIZED -> (INITIAL_RECOVERY | OK) ->
//! FINAL_RECOVERY -> OK`, narrowed to this engine's snapshot-only recovery
//! surface.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use duskdb_core::SpaceId;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::paths;
use crate::reader::SnapshotReader;

/// Number of rows replayed between cooperative yield points, so a large
/// snapshot replay never monopolizes the single database task for long.
pub const YIELD_EVERY_ROWS: u64 = 100_000;

/// Where the recovery state machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// No recovery has started yet.
    Initialized,
    /// Replaying the most recent snapshot file.
    InitialRecovery,
    /// Snapshot replay finished; running whatever final catch-up the
    /// caller requires before serving reads and writes.
    FinalRecovery,
    /// Fully caught up and ready to serve traffic.
    Ok,
}

/// Drives a single storage engine instance's directory through recovery.
///
/// `owns_space` is boxed (rather than a generic type parameter) so the
/// engine facade can hold a `RecoveryCoordinator` as a plain struct field
/// without becoming generic itself.
pub struct RecoveryCoordinator {
    dir: PathBuf,
    state: RecoveryState,
    owns_space: Box<dyn Fn(SpaceId) -> bool + Send>,
    force: bool,
}

impl RecoveryCoordinator {
    /// Build a coordinator over `dir`. `owns_space` decides whether a row's
    /// target space belongs to this engine instance, so rows written by a
    /// co-located engine sharing the directory are rejected rather than
    /// silently applied. `force` downgrades otherwise-fatal anomalies
    /// (duplicate snapshot signatures, an unreadable latest snapshot with
    /// an older one available) to warnings.
    pub fn new(
        dir: impl Into<PathBuf>,
        owns_space: impl Fn(SpaceId) -> bool + Send + 'static,
        force: bool,
    ) -> Self {
        RecoveryCoordinator {
            dir: dir.into(),
            state: RecoveryState::Initialized,
            owns_space: Box::new(owns_space),
            force,
        }
    }

    /// Current state machine position.
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    fn expect_state(&self, expected: RecoveryState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState(format!(
                "expected {:?}, found {:?}",
                expected, self.state
            )));
        }
        Ok(())
    }

    /// First-run bootstrap: if `dir` has no snapshot files at all, create it
    /// and move straight to [`RecoveryState::Ok`] with an empty space.
    /// Returns `true` if bootstrap applied (directory was empty).
    pub fn bootstrap(&mut self) -> Result<bool> {
        self.expect_state(RecoveryState::Initialized)?;
        fs::create_dir_all(&self.dir)?;
        if discover_snapshots(&self.dir)?.is_empty() {
            self.state = RecoveryState::Ok;
            info!(dir = %self.dir.display(), "bootstrapped empty storage directory");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Enter `INITIAL_RECOVERY` and replay the most recent snapshot file's
    /// rows through `on_row`, rejecting rows for spaces this engine does not
    /// own and yielding cooperatively every [`YIELD_EVERY_ROWS`] rows via
    /// `yield_point`.
    ///
    /// Under `force`, this goes straight through to [`RecoveryState::Ok`]
    /// instead of stopping at `INITIAL_RECOVERY`, so the caller builds all
    /// keys — primary and secondary — during this same snapshot read rather
    /// than deferring secondary keys to `FINAL_RECOVERY`/`end_recovery`.
    /// That earlier enabling is what lets a disaster-recovery read surface
    /// corruption-induced duplicate keys as drops instead of a later
    /// rebuild silently losing them. Any stale `.inprogress` files that
    /// `end_recovery` would otherwise collect are cleaned up here instead,
    /// since a force-recovered coordinator never passes back through
    /// `FINAL_RECOVERY`.
    ///
    /// A snapshot that ends without its EOF marker, or whose CRC fails
    /// mid-stream, is treated as an unrecoverable invariant violation and
    /// panics rather than returning an `Err` — the same fatal-on-corruption
    /// policy the checkpoint writer applies to a failed commit rename.
    pub fn begin_initial_recovery(
        &mut self,
        mut on_row: impl FnMut(SpaceId, Vec<u8>) -> Result<()>,
        mut yield_point: impl FnMut(),
    ) -> Result<()> {
        self.expect_state(RecoveryState::Initialized)?;
        self.state = RecoveryState::InitialRecovery;

        match self.select_snapshot()? {
            Some(snapshot_path) => {
                let reader = SnapshotReader::open(&snapshot_path)?;
                let mut rows_replayed: u64 = 0;
                let replayed = reader.replay(|row| {
                    if !(self.owns_space)(row.space_id) {
                        return Err(Error::CrossEngineRow {
                            space: row.space_id.0,
                        });
                    }
                    on_row(row.space_id, row.tuple)?;
                    rows_replayed += 1;
                    if rows_replayed % YIELD_EVERY_ROWS == 0 {
                        yield_point();
                    }
                    Ok(())
                });
                if let Err(Error::Corrupt { path, reason }) = &replayed {
                    panic!("snapshot {path} is corrupt, fatal: {reason}");
                }
                replayed?;
                info!(path = %snapshot_path.display(), rows = rows_replayed, "initial recovery replayed snapshot");
            }
            None => {
                info!(dir = %self.dir.display(), "no snapshot found; starting from empty state");
            }
        }

        if self.force {
            let removed = self.cleanup_stale_inprogress()?;
            self.state = RecoveryState::Ok;
            info!(
                dir = %self.dir.display(),
                stale_inprogress = removed.len(),
                "force recovery: all keys enabled, skipping final recovery phase",
            );
        }

        Ok(())
    }

    /// Pick the snapshot file to replay: the most recently modified final
    /// (non-`.inprogress`) snapshot. In `force` mode, a corrupt latest
    /// snapshot is skipped in favor of the next-most-recent rather than
    /// failing recovery outright.
    fn select_snapshot(&self) -> Result<Option<PathBuf>> {
        let mut candidates = discover_snapshots(&self.dir)?;
        candidates.sort_by_key(|(_, mtime)| std::cmp::Reverse(*mtime));

        let mut last_err = None;
        for (path, _) in &candidates {
            match SnapshotReader::open(path) {
                Ok(_) => return Ok(Some(path.clone())),
                Err(e) if self.force => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable snapshot under force recovery");
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = last_err {
            warn!(error = %e, "all snapshots unreadable under force recovery; starting empty");
        }
        Ok(None)
    }

    /// Transition `INITIAL_RECOVERY -> FINAL_RECOVERY`. The caller is
    /// expected to have finished replaying the initial snapshot and is now
    /// free to apply whatever catch-up source (e.g. a replication stream)
    /// it layers on top of this crate.
    pub fn begin_final_recovery(&mut self) -> Result<()> {
        self.expect_state(RecoveryState::InitialRecovery)?;
        self.state = RecoveryState::FinalRecovery;
        Ok(())
    }

    /// Finish recovery, transitioning to [`RecoveryState::Ok`]. Collects
    /// (and removes) any `.inprogress` snapshot files left behind by a
    /// checkpoint that was interrupted before the crash, returning their
    /// former paths for logging.
    pub fn end_recovery(&mut self) -> Result<Vec<PathBuf>> {
        self.expect_state(RecoveryState::FinalRecovery)?;

        let removed = self.cleanup_stale_inprogress()?;
        self.state = RecoveryState::Ok;
        info!(dir = %self.dir.display(), stale_inprogress = removed.len(), "recovery complete");
        Ok(removed)
    }

    /// Remove any `.inprogress` snapshot files left behind by a checkpoint
    /// interrupted before a crash, returning their former paths.
    fn cleanup_stale_inprogress(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if paths::is_inprogress(&path) {
                fs::remove_file(&path)?;
                removed.push(path);
            }
        }
        Ok(removed)
    }
}

fn discover_snapshots(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut out = Vec::new();
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
        out.push((path, mtime));
    }
    Ok(out)
}
