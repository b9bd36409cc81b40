//! Error types shared across the duskdb crates.
//!
//! Non-fatal errors are returned through this type. Fatal invariant
//! violations — corrupt snapshots, a failed checkpoint rename, a failed
//! rollback — are not represented here: they terminate the process via
//! `panic!` at the call site rather than being threaded through `Result`.

use std::io;
use thiserror::Error;

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal error conditions raised by the storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The allocator could not satisfy a request even after a GC pass.
    #[error("out of memory: requested {requested} bytes from a {quota} byte quota")]
    OutOfMemory {
        /// Bytes requested by the failed allocation.
        requested: usize,
        /// Configured quota ceiling.
        quota: usize,
    },

    /// A tuple's encoded size exceeds the configured maximum.
    #[error("tuple of {size} bytes exceeds the configured maximum of {max} bytes")]
    TupleTooLarge {
        /// Size the tuple would have occupied.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The raw payload could not be decoded into a field map.
    #[error("malformed tuple payload: {0}")]
    FormatError(String),

    /// A recovery row named a request type other than INSERT.
    #[error("unknown or unsupported request type during recovery: {0}")]
    UnknownRequestType(String),

    /// A recovery row targeted a space belonging to a different engine.
    #[error("row targets a space owned by a different engine: {0}")]
    CrossEngineTransaction(String),

    /// I/O error underlying a snapshot or extent-pool operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error may succeed if retried after reclaiming memory.
    pub fn is_retryable_after_gc(&self) -> bool {
        matches!(self, Error::OutOfMemory { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_display() {
        let e = Error::OutOfMemory {
            requested: 1024,
            quota: 512,
        };
        let msg = e.to_string();
        assert!(msg.contains("1024"));
        assert!(msg.contains("512"));
        assert!(e.is_retryable_after_gc());
    }

    #[test]
    fn tuple_too_large_is_not_retryable() {
        let e = Error::TupleTooLarge {
            size: 2_000_000,
            max: 1_048_576,
        };
        assert!(!e.is_retryable_after_gc());
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
