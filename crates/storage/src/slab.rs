//! A cache of slabs drawn from one [`Arena`], reused across allocation
//! cycles instead of being returned to the arena's quota on every free.
//!
//! The tuple allocator and the extent pool each own one `SlabCache` over the
//! same arena, per spec: two independent caches, one quota.

use std::sync::Arc;

use duskdb_core::Result;
use parking_lot::Mutex;

use crate::arena::{Arena, Slab};

/// A pool of slabs belonging to one consumer (tuple data or index extents).
pub struct SlabCache {
    arena: Arc<Arena>,
    free: Mutex<Vec<Slab>>,
}

impl SlabCache {
    /// Create an empty cache over `arena`.
    pub fn new(arena: Arc<Arena>) -> Self {
        SlabCache {
            arena,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Size of one slab in this cache.
    pub fn slab_bytes(&self) -> usize {
        self.arena.slab_bytes()
    }

    /// Hand out a slab: reuse a previously released one, or charge the
    /// arena's quota for a fresh one.
    pub fn acquire(&self) -> Result<Slab> {
        if let Some(slab) = self.free.lock().pop() {
            return Ok(slab);
        }
        self.arena.alloc_slab()
    }

    /// Return a slab to this cache for reuse. The slab remains charged
    /// against the arena's quota until [`SlabCache::shrink_to`] trims it.
    pub fn release(&self, slab: Slab) {
        self.free.lock().push(slab);
    }

    /// Number of slabs currently idle in this cache.
    pub fn idle_slabs(&self) -> usize {
        self.free.lock().len()
    }

    /// Drop idle slabs back to the arena's quota until at most `keep`
    /// remain cached. Used by GC to relinquish memory under pressure.
    pub fn shrink_to(&self, keep: usize) {
        let mut free = self.free.lock();
        while free.len() > keep {
            if let Some(slab) = free.pop() {
                self.arena.free_slab(slab);
            }
        }
    }
}
