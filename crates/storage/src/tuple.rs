//! Tuple factory: builds tuples, stamps them with the current snapshot
//! generation, and drives their allocation/free lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use duskdb_core::{Error, Generation, Limits, Result};
use parking_lot::Mutex;

use crate::alloc::{FreeMode, Object, SmallAlloc};
use crate::format_registry::{FormatId, FormatRegistry};

/// Fixed overhead of a tuple header (generation stamp, refcount, payload
/// size, format id, data offset) in bytes.
const HEADER_BYTES: usize = 16;

/// A variably-sized record sharing the tuple arena with other tuples.
pub struct Tuple {
    generation: Generation,
    refcount: u32,
    format: FormatId,
    object: Object,
}

impl Tuple {
    /// The generation stamped at allocation time.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Format identifier.
    pub fn format(&self) -> FormatId {
        self.format
    }

    /// Current reference count.
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Raw encoded payload (field map followed by serialized body).
    pub fn payload(&self) -> &[u8] {
        self.object.bytes()
    }

    /// Increment the reference count; called when an index starts
    /// referencing this tuple.
    pub fn retain(&mut self) {
        self.refcount += 1;
    }

    /// Decrement the reference count; called when an index stops
    /// referencing this tuple. Returns the new count.
    pub fn release(&mut self) -> u32 {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }
}

/// An auxiliary, tuple-associated block allocated from the same arena,
/// e.g. an out-of-line large field's storage.
pub struct Chunk {
    format: FormatId,
    object: Object,
}

impl Chunk {
    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        self.object.bytes()
    }
}

/// Builds and retires [`Tuple`]s and [`Chunk`]s through a [`SmallAlloc`].
pub struct TupleFactory {
    alloc: Arc<SmallAlloc>,
    formats: Arc<FormatRegistry>,
    limits: Limits,
    generation: AtomicU32,
    gc_step: Mutex<Box<dyn FnMut() -> bool + Send>>,
}

impl TupleFactory {
    /// Create a factory. `gc_step` is invoked (by the allocator's retry
    /// loop) to run one unit of GC work on out-of-memory; it should return
    /// `false` once GC has no more work to offer.
    pub fn new(
        alloc: Arc<SmallAlloc>,
        formats: Arc<FormatRegistry>,
        limits: Limits,
        gc_step: Box<dyn FnMut() -> bool + Send>,
    ) -> Self {
        TupleFactory {
            alloc,
            formats,
            limits,
            generation: AtomicU32::new(Generation::INITIAL.0),
            gc_step: Mutex::new(gc_step),
        }
    }

    /// The engine's current snapshot generation.
    pub fn current_generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::Acquire))
    }

    /// Advance to the next snapshot generation. Called exactly once at the
    /// start of each checkpoint.
    pub fn advance_generation(&self) -> Generation {
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Generation(next)
    }

    /// Build a tuple from a raw serialized body, decoding its field map and
    /// stamping it with the current generation.
    pub fn make_tuple(&self, format: FormatId, raw_body: &[u8]) -> Result<Tuple> {
        let field_map_bytes = self.formats.field_map_bytes(format);
        let total = HEADER_BYTES + field_map_bytes + raw_body.len();
        if total > self.limits.max_tuple_bytes {
            return Err(Error::TupleTooLarge {
                size: total,
                max: self.limits.max_tuple_bytes,
            });
        }

        let mut gc_step = self.gc_step.lock();
        let mut object = self.alloc.alloc(total, &mut *gc_step)?;
        object.bytes_mut()[..raw_body.len()].copy_from_slice(raw_body);

        self.formats.acquire(format);

        Ok(Tuple {
            generation: self.current_generation(),
            refcount: 0,
            format,
            object,
        })
    }

    /// Release a tuple's storage. Precondition: `tuple.refcount() == 0`.
    pub fn drop_tuple(&self, tuple: Tuple) {
        assert_eq!(
            tuple.refcount, 0,
            "drop_tuple called on a tuple still referenced by an index"
        );

        self.formats.release(tuple.format);

        let releases_immediately = self.alloc.mode() == FreeMode::Immediate
            || tuple.generation == self.current_generation()
            || self.formats.is_temporary(tuple.format);

        if releases_immediately {
            self.alloc.free_immediate(tuple.object);
        } else {
            self.alloc.free_delayed(tuple.object);
        }
    }

    /// Allocate an auxiliary chunk sharing the tuple arena.
    pub fn make_chunk(&self, format: FormatId, payload: &[u8]) -> Result<Chunk> {
        let mut gc_step = self.gc_step.lock();
        let mut object = self.alloc.alloc(payload.len(), &mut *gc_step)?;
        // The newly allocated chunk is what must be checked, not a
        // pre-existing tuple handle: allocation failure already returns
        // `Err` above, so reaching here guarantees `object` is valid.
        object.bytes_mut()[..payload.len()].copy_from_slice(payload);
        self.formats.acquire(format);
        Ok(Chunk { format, object })
    }

    /// Release a chunk's storage.
    pub fn drop_chunk(&self, chunk: Chunk) {
        self.formats.release(chunk.format);
        if self.alloc.mode() == FreeMode::Immediate || self.formats.is_temporary(chunk.format) {
            self.alloc.free_immediate(chunk.object);
        } else {
            self.alloc.free_delayed(chunk.object);
        }
    }
}
