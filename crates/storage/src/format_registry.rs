//! Tuple format registry: tracks how many live tuples reference each
//! format and whether a format is temporary (ephemeral-space tuples, which
//! are never visible to a snapshot and so are always safe to free
//! immediately — spec I2).

use std::collections::HashMap;

use parking_lot::Mutex;

/// Identifies a tuple's field layout. Interpreting the layout itself is the
/// binary tuple decoder's job, out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatId(pub u32);

#[derive(Debug, Clone, Copy)]
struct FormatEntry {
    temporary: bool,
    field_map_bytes: usize,
    refcount: u64,
}

/// Registry of known tuple formats.
#[derive(Default)]
pub struct FormatRegistry {
    formats: Mutex<HashMap<FormatId, FormatEntry>>,
}

impl FormatRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        FormatRegistry::default()
    }

    /// Register a format. `field_map_bytes` is the fixed overhead this
    /// format's decoded field map contributes to every tuple's total size.
    pub fn register(&self, id: FormatId, field_map_bytes: usize, temporary: bool) {
        self.formats.lock().insert(
            id,
            FormatEntry {
                temporary,
                field_map_bytes,
                refcount: 0,
            },
        );
    }

    /// Whether `id` was registered as temporary.
    pub fn is_temporary(&self, id: FormatId) -> bool {
        self.formats
            .lock()
            .get(&id)
            .map(|f| f.temporary)
            .unwrap_or(false)
    }

    /// Fixed field-map overhead for `id`.
    pub fn field_map_bytes(&self, id: FormatId) -> usize {
        self.formats
            .lock()
            .get(&id)
            .map(|f| f.field_map_bytes)
            .unwrap_or(0)
    }

    /// Bump a format's reference count (one new tuple now references it).
    pub fn acquire(&self, id: FormatId) {
        if let Some(entry) = self.formats.lock().get_mut(&id) {
            entry.refcount += 1;
        }
    }

    /// Release a format reference (a tuple referencing it was dropped).
    pub fn release(&self, id: FormatId) {
        if let Some(entry) = self.formats.lock().get_mut(&id) {
            entry.refcount = entry.refcount.saturating_sub(1);
        }
    }

    /// Current reference count for `id`.
    pub fn refcount(&self, id: FormatId) -> u64 {
        self.formats.lock().get(&id).map(|f| f.refcount).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_refcount_across_acquire_and_release() {
        let reg = FormatRegistry::new();
        let fmt = FormatId(1);
        reg.register(fmt, 8, false);
        reg.acquire(fmt);
        reg.acquire(fmt);
        assert_eq!(reg.refcount(fmt), 2);
        reg.release(fmt);
        assert_eq!(reg.refcount(fmt), 1);
    }

    #[test]
    fn temporary_flag_is_preserved() {
        let reg = FormatRegistry::new();
        reg.register(FormatId(2), 0, true);
        assert!(reg.is_temporary(FormatId(2)));
        assert!(!reg.is_temporary(FormatId(3)));
    }
}
