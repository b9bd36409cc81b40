//! Engine-wide tunables, collected into one flat struct with a `Default`
//! impl matching the documented defaults, constructed once at engine
//! startup and threaded through everywhere else by value or `Arc`.

use std::path::PathBuf;

use duskdb_core::Limits;

/// Engine-wide configuration, covering every engine-level tunable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory snapshot files are written to and read from.
    pub snapshot_dir: PathBuf,
    /// Disaster-recovery mode: build all indexes up front during recovery
    /// so duplicate-key violations are dropped with a warning rather than
    /// aborting startup.
    pub force_recovery: bool,
    /// Tuple arena's overall byte ceiling.
    pub arena_max_bytes: usize,
    /// Minimum object size objects are rounded up to (itself rounded up to
    /// 16 bytes).
    pub min_object_bytes: usize,
    /// Allocation growth factor for size-class rounding.
    pub growth_factor: f64,
    /// Advisory flag asking the OS not to include engine memory in core
    /// dumps. Not enforced by this crate (no `madvise`-equivalent call is
    /// in scope) but threaded through so a caller's embedding layer can act
    /// on it.
    pub dont_dump_core: bool,
    /// Optional I/O rate limit (bytes/sec) for snapshot writes.
    pub io_rate_limit_bytes_per_sec: Option<u64>,
    /// Maximum serialized tuple size, in bytes.
    pub max_tuple_bytes: usize,
}

impl EngineConfig {
    /// Build the shared allocator [`Limits`] this configuration implies.
    pub fn limits(&self) -> Limits {
        Limits {
            max_tuple_bytes: self.max_tuple_bytes,
            min_object_bytes: self.min_object_bytes,
            growth_factor: self.growth_factor,
            slab_bytes: Limits::default().slab_bytes,
            extent_bytes: Limits::default().extent_bytes,
        }
    }

    /// Optional rate limit translated into the durability crate's type.
    pub fn rate_limit(&self) -> Option<duskdb_durability::RateLimit> {
        self.io_rate_limit_bytes_per_sec
            .map(|bytes_per_sec| duskdb_durability::RateLimit { bytes_per_sec })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = Limits::default();
        EngineConfig {
            snapshot_dir: PathBuf::from("./snapshots"),
            force_recovery: false,
            arena_max_bytes: limits.slab_bytes * 64,
            min_object_bytes: limits.min_object_bytes,
            growth_factor: limits.growth_factor,
            dont_dump_core: false,
            io_rate_limit_bytes_per_sec: None,
            max_tuple_bytes: limits.max_tuple_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let config = EngineConfig::default();
        assert_eq!(config.max_tuple_bytes, 1024 * 1024);
        assert_eq!(config.min_object_bytes, 16);
        assert!(!config.force_recovery);
        assert!(config.io_rate_limit_bytes_per_sec.is_none());
    }

    #[test]
    fn rate_limit_translates_when_set() {
        let mut config = EngineConfig::default();
        config.io_rate_limit_bytes_per_sec = Some(4 * 1024 * 1024);
        assert_eq!(config.rate_limit().unwrap().bytes_per_sec, 4 * 1024 * 1024);
        assert!(EngineConfig::default().rate_limit().is_none());
    }
}
