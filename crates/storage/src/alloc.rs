//! Size-class allocator over the tuple slab cache, with immediate and
//! delayed free modes.

use std::sync::Arc;

use duskdb_core::{Limits, Result};
use parking_lot::Mutex;

use crate::arena::Arena;
use crate::retry::retry_with_gc;

/// Whether frees are released the instant they are queued, or held until
/// the allocator is told to leave delayed mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeMode {
    /// Frees take effect immediately.
    Immediate,
    /// Frees are queued; call [`SmallAlloc::leave_delayed_mode`] to flush.
    Delayed,
}

/// A heap-allocated object whose size has been charged against the arena's
/// quota. Dropping this value without going through [`SmallAlloc::free_immediate`]
/// or [`SmallAlloc::free_delayed`] would leak the charge, so it carries no
/// `Drop` impl of its own — callers are expected to always release it
/// through the allocator that produced it.
#[derive(Debug)]
pub struct Object {
    bytes: Vec<u8>,
    charged_bytes: usize,
}

impl Object {
    /// The object's payload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The object's payload, mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

struct Inner {
    mode: FreeMode,
    delayed: Vec<Object>,
}

/// Size-class allocator handing out [`Object`]s backed by one [`Arena`].
pub struct SmallAlloc {
    arena: Arc<Arena>,
    limits: Limits,
    inner: Mutex<Inner>,
}

impl SmallAlloc {
    /// Create an allocator in immediate-free mode.
    pub fn new(arena: Arc<Arena>, limits: Limits) -> Self {
        SmallAlloc {
            arena,
            limits,
            inner: Mutex::new(Inner {
                mode: FreeMode::Immediate,
                delayed: Vec::new(),
            }),
        }
    }

    /// Current free mode.
    pub fn mode(&self) -> FreeMode {
        self.inner.lock().mode
    }

    /// Enter delayed-free mode (spec I1: while any checkpoint is in
    /// flight).
    pub fn enter_delayed_mode(&self) {
        self.inner.lock().mode = FreeMode::Delayed;
    }

    /// Leave delayed-free mode, releasing every queued object back to the
    /// arena in bulk.
    pub fn leave_delayed_mode(&self) {
        let mut inner = self.inner.lock();
        inner.mode = FreeMode::Immediate;
        for obj in inner.delayed.drain(..) {
            self.arena.release(obj.charged_bytes);
        }
    }

    /// Allocate `size` bytes, rounded to the allocator's object
    /// granularity, retrying through `gc_step` on exhaustion.
    pub fn alloc(&self, size: usize, mut gc_step: impl FnMut() -> bool) -> Result<Object> {
        let charged = self.limits.round_to_object_size(size);
        retry_with_gc(
            || {
                self.arena.charge(charged)?;
                Ok(Object {
                    bytes: vec![0u8; size],
                    charged_bytes: charged,
                })
            },
            &mut gc_step,
        )
    }

    /// Release `obj` right away, regardless of the allocator's current
    /// mode. Used when the caller has already established the object's
    /// generation makes it safe (spec I2).
    pub fn free_immediate(&self, obj: Object) {
        self.arena.release(obj.charged_bytes);
    }

    /// Queue `obj` for release once the allocator leaves delayed mode.
    pub fn free_delayed(&self, obj: Object) {
        self.inner.lock().delayed.push(obj);
    }

    /// Number of objects currently queued for delayed release.
    pub fn delayed_count(&self) -> usize {
        self.inner.lock().delayed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(max_bytes: usize) -> SmallAlloc {
        SmallAlloc::new(Arc::new(Arena::new(64, max_bytes)), Limits::with_small_limits())
    }

    #[test]
    fn immediate_mode_is_default() {
        let a = alloc(4096);
        assert_eq!(a.mode(), FreeMode::Immediate);
    }

    #[test]
    fn delayed_objects_stay_charged_until_drained() {
        let a = alloc(4096);
        a.enter_delayed_mode();
        let obj = a.alloc(10, || false).unwrap();
        let used_before = a.arena.used_bytes();
        a.free_delayed(obj);
        assert_eq!(a.delayed_count(), 1);
        assert_eq!(a.arena.used_bytes(), used_before);

        a.leave_delayed_mode();
        assert_eq!(a.delayed_count(), 0);
        assert_eq!(a.arena.used_bytes(), 0);
        assert_eq!(a.mode(), FreeMode::Immediate);
    }

    #[test]
    fn immediate_free_releases_right_away() {
        let a = alloc(4096);
        let obj = a.alloc(10, || false).unwrap();
        assert!(a.arena.used_bytes() > 0);
        a.free_immediate(obj);
        assert_eq!(a.arena.used_bytes(), 0);
    }

    #[test]
    fn alloc_retries_through_gc_on_exhaustion() {
        let a = alloc(16);
        let first = a.alloc(16, || false).unwrap();
        let mut gc_called = false;
        let result = a.alloc(16, || {
            gc_called = true;
            false
        });
        assert!(gc_called);
        assert!(result.is_err());
        a.free_immediate(first);
    }
}
