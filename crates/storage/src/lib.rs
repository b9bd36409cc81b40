//! Tuple arena, size-class allocator, and extent pool for the duskdb
//! storage engine.
//!
//! Layout:
//! - [`arena`]: byte quota fronting the underlying slabs.
//! - [`slab`]: slab caches drawn from one arena, reused across cycles.
//! - [`alloc`]: size-class allocator with immediate/delayed free modes.
//! - [`extent`]: fixed-size index extent pool with pre-reservation.
//! - [`format_registry`]: per-format refcounts and the temporary flag.
//! - [`tuple`]: the tuple/chunk factory tying the above together.

#![warn(missing_docs)]

pub mod alloc;
pub mod arena;
pub mod extent;
pub mod format_registry;
pub mod retry;
pub mod slab;
pub mod tuple;

pub use alloc::{FreeMode, Object, SmallAlloc};
pub use arena::{Arena, Slab};
pub use extent::{Extent, ExtentPool};
pub use format_registry::{FormatId, FormatRegistry};
pub use slab::SlabCache;
pub use tuple::{Chunk, Tuple, TupleFactory};
