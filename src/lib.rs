//! # duskdb
//!
//! The in-memory storage engine core of a transactional database: a tuple
//! allocator with snapshot-versioned delayed-free, a copy-on-write
//! checkpoint writer, a recovery state machine, and cooperative garbage
//! collection for retired index memory.
//!
//! This crate re-exports the [`Engine`] facade from `duskdb-engine`, the
//! single entry point a surrounding database binds to. The index
//! structures, transaction manager, write-ahead log, replication, and tuple
//! decoder are out of scope — see the crate-level docs of `duskdb-core` for
//! the collaborator traits this engine expects the surrounding database to
//! supply.
//!
//! ```no_run
//! use duskdb::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default());
//! engine.bootstrap()?;
//! # Ok::<(), duskdb::Error>(())
//! ```

pub use duskdb_engine::{
    rollback_statement, Engine, EngineConfig, Error, GcStep, GcWorker, MemoryStat, Result,
    TupleHandle,
};
