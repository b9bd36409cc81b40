//! Byte-counting quota fronting a slab arena.
//!
//! The arena owns no allocation policy: it only tracks how many bytes have
//! been committed against a configured ceiling, in units of whole slabs.
//! Higher layers ([`crate::alloc::SmallAlloc`], [`crate::extent::ExtentPool`])
//! ask it for slabs and hand them back when drained.

use duskdb_core::{Error, Result};
use parking_lot::Mutex;

/// One fixed-size slab carved out of the arena's quota.
///
/// The actual backing bytes live in the `Vec<u8>` owned here; the arena's
/// job is solely to account for the quota charge, not to manage raw memory.
#[derive(Debug)]
pub struct Slab {
    bytes: Vec<u8>,
}

impl Slab {
    /// Raw byte length of this slab.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether this slab is zero-sized (never true for a slab the arena
    /// produced, but spelled out for clippy's `len_without_is_empty`).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

struct Inner {
    used_bytes: usize,
    max_bytes: usize,
}

/// A byte quota backing one or more slab caches.
pub struct Arena {
    inner: Mutex<Inner>,
    slab_bytes: usize,
}

impl Arena {
    /// Create an arena with a given per-slab size and overall byte ceiling.
    pub fn new(slab_bytes: usize, max_bytes: usize) -> Self {
        Arena {
            inner: Mutex::new(Inner {
                used_bytes: 0,
                max_bytes,
            }),
            slab_bytes,
        }
    }

    /// Configured slab size.
    pub fn slab_bytes(&self) -> usize {
        self.slab_bytes
    }

    /// Bytes currently committed against the quota.
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    /// Overall quota ceiling.
    pub fn max_bytes(&self) -> usize {
        self.inner.lock().max_bytes
    }

    /// Allocate one slab, charging its size against the quota.
    pub fn alloc_slab(&self) -> Result<Slab> {
        self.charge(self.slab_bytes)?;
        Ok(Slab {
            bytes: vec![0u8; self.slab_bytes],
        })
    }

    /// Return a slab's bytes to the quota.
    pub fn free_slab(&self, slab: Slab) {
        self.release(slab.len());
        drop(slab);
    }

    /// Charge an arbitrary number of bytes against the quota, for
    /// allocators (the small-object allocator) that don't deal in whole
    /// slabs. Fails without mutating state if the charge would exceed the
    /// ceiling.
    pub fn charge(&self, bytes: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let next = inner.used_bytes + bytes;
        if next > inner.max_bytes {
            return Err(Error::OutOfMemory {
                requested: bytes,
                quota: inner.max_bytes,
            });
        }
        inner.used_bytes = next;
        Ok(())
    }

    /// Release a byte charge previously made with [`Arena::charge`].
    pub fn release(&self, bytes: usize) {
        let mut inner = self.inner.lock();
        inner.used_bytes = inner.used_bytes.saturating_sub(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_charges_quota() {
        let arena = Arena::new(1024, 4096);
        let slab = arena.alloc_slab().unwrap();
        assert_eq!(slab.len(), 1024);
        assert_eq!(arena.used_bytes(), 1024);
    }

    #[test]
    fn free_releases_quota() {
        let arena = Arena::new(1024, 4096);
        let slab = arena.alloc_slab().unwrap();
        arena.free_slab(slab);
        assert_eq!(arena.used_bytes(), 0);
    }

    #[test]
    fn exhausted_quota_errors() {
        let arena = Arena::new(1024, 2048);
        let _a = arena.alloc_slab().unwrap();
        let _b = arena.alloc_slab().unwrap();
        let err = arena.alloc_slab().unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { .. }));
    }
}
