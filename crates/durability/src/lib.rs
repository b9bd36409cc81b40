//! Snapshot file format, writer, reader, and recovery state machine for the
//! duskdb storage engine.

#![warn(missing_docs)]

pub mod error;
pub mod format;
pub mod paths;
pub mod reader;
pub mod recovery;
pub mod writer;

pub use error::{Error, Result};
pub use format::{Row, RowRead, EOF_MARKER, FORMAT_VERSION};
pub use reader::SnapshotReader;
pub use recovery::{RecoveryCoordinator, RecoveryState, YIELD_EVERY_ROWS};
pub use writer::{RateLimit, SnapshotWriter, SYNC_INTERVAL_BYTES};
