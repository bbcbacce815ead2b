//! Two-tier aggregation cache
//!
//! [`FileCache`] persists one JSON document per session and validates it
//! against the source transcript's identity signals; [`MemoryCache`] holds
//! the live working set the detector reads from.

pub mod file_cache;
pub mod memory_cache;

pub use file_cache::{CacheLookup, FileCache, MissReason, ValidationOutcome};
pub use memory_cache::{MemoryCache, MemoryCacheEntry};
