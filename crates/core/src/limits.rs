//! Size limits enforced by the allocator and tuple factory.

/// Size limits enforced by the tuple factory and allocator.
///
/// After a value is agreed upon at engine construction these are treated as
/// fixed for the lifetime of the engine — changing `max_tuple_bytes` mid-run
/// would make previously-allocated tuples inconsistent with new ones.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum encoded tuple size in bytes (header + field map + payload).
    /// Default 1 MiB.
    pub max_tuple_bytes: usize,

    /// Minimum small-object size class, rounded up to a multiple of 16.
    /// Default 16 bytes.
    pub min_object_bytes: usize,

    /// Size-class growth factor applied by the small-object allocator.
    pub growth_factor: f64,

    /// Size of one arena slab in bytes. Default 16 MiB.
    pub slab_bytes: usize,

    /// Size of one index extent in bytes. Default 16 KiB.
    pub extent_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_tuple_bytes: 1024 * 1024,
            min_object_bytes: 16,
            growth_factor: 1.2,
            slab_bytes: 16 * 1024 * 1024,
            extent_bytes: 16 * 1024,
        }
    }
}

impl Limits {
    /// Limits with small values, useful for tests that want to exercise
    /// OutOfMemory/TupleTooLarge paths without allocating megabytes.
    pub fn with_small_limits() -> Self {
        Limits {
            max_tuple_bytes: 4096,
            min_object_bytes: 16,
            growth_factor: 1.2,
            slab_bytes: 64 * 1024,
            extent_bytes: 1024,
        }
    }

    /// Round `size` up to this allocator's minimum object granularity.
    pub fn round_to_object_size(&self, size: usize) -> usize {
        let m = self.min_object_bytes;
        size.div_ceil(m) * m
    }
}
