//! Fixed-size extent pool with pre-reservation so index rebalances, once
//! started, cannot fail partway through.

use std::sync::Arc;

use duskdb_core::Result;
use parking_lot::Mutex;

use crate::arena::{Arena, Slab};
use crate::retry::retry_with_gc;
use crate::slab::SlabCache;

/// One fixed-size block of memory used by index internals.
pub struct Extent(Slab);

impl Extent {
    /// Raw byte length of this extent.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the extent is zero-sized (never true in practice).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pool of fixed-size extents backed by a dedicated slab cache whose slab
/// size equals the configured extent size.
pub struct ExtentPool {
    general: SlabCache,
    reserved: Mutex<Vec<Slab>>,
}

impl ExtentPool {
    /// Create a pool drawing extents from `arena`. `arena`'s slab size must
    /// equal the configured extent size.
    pub fn new(arena: Arc<Arena>) -> Self {
        ExtentPool {
            general: SlabCache::new(arena),
            reserved: Mutex::new(Vec::new()),
        }
    }

    /// Ensure at least `n` extents sit on the pre-reserved free list,
    /// running GC retries on exhaustion. After this returns `Ok`, the next
    /// `n` calls to [`ExtentPool::alloc`] are guaranteed to succeed without
    /// touching the underlying pool.
    pub fn reserve(&self, n: usize, mut gc_step: impl FnMut() -> bool) -> Result<()> {
        let mut reserved = self.reserved.lock();
        while reserved.len() < n {
            let slab = retry_with_gc(|| self.general.acquire(), &mut gc_step)?;
            reserved.push(slab);
        }
        Ok(())
    }

    /// Allocate one extent: pop from the reserved list first, otherwise
    /// from the underlying pool (with GC retries on exhaustion).
    pub fn alloc(&self, mut gc_step: impl FnMut() -> bool) -> Result<Extent> {
        if let Some(slab) = self.reserved.lock().pop() {
            return Ok(Extent(slab));
        }
        let slab = retry_with_gc(|| self.general.acquire(), &mut gc_step)?;
        Ok(Extent(slab))
    }

    /// Return an extent to the underlying pool for reuse.
    pub fn free(&self, extent: Extent) {
        self.general.release(extent.0);
    }

    /// Number of extents currently sitting on the pre-reserved list.
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }
}
