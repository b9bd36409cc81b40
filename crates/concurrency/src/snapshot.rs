//! Read-view bookkeeping: tracks which snapshot generations currently have
//! an open reader, so the allocator's delayed-free path knows it must not
//! recycle a tuple a live reader might still walk past.
//!
//! A cheaply cloneable, thread-safe handle over a point-in-time view.
//! Tuples live behind per-index iterators rather than a single cloned map,
//! so the handle here only carries the generation stamp and a refcount,
//! not the data itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use duskdb_core::Generation;
use parking_lot::Mutex;

/// Tracks every currently-open snapshot's generation.
#[derive(Clone)]
pub struct SnapshotRegistry {
    inner: Arc<Mutex<BTreeMap<u32, u64>>>,
}

impl SnapshotRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        SnapshotRegistry {
            inner: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Register a new reader at `generation`, returning a guard that
    /// unregisters it on drop.
    pub fn open(&self, generation: Generation) -> SnapshotHandle {
        *self.inner.lock().entry(generation.0).or_insert(0) += 1;
        SnapshotHandle {
            registry: self.clone(),
            generation,
        }
    }

    fn close(&self, generation: Generation) {
        let mut map = self.inner.lock();
        if let Some(count) = map.get_mut(&generation.0) {
            *count -= 1;
            if *count == 0 {
                map.remove(&generation.0);
            }
        }
    }

    /// The oldest generation with at least one open reader, if any. A GC
    /// task must not reclaim tuples stamped at or after this generation.
    pub fn oldest_active(&self) -> Option<Generation> {
        self.inner.lock().keys().next().copied().map(Generation)
    }

    /// Number of distinct generations currently held open by a reader.
    pub fn open_count(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for one open reader at a fixed generation. Drop closes it.
pub struct SnapshotHandle {
    registry: SnapshotRegistry,
    generation: Generation,
}

impl SnapshotHandle {
    /// The generation this handle pins.
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl Drop for SnapshotHandle {
    fn drop(&mut self) {
        self.registry.close(self.generation);
    }
}
