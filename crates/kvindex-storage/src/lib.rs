//! kvindex-storage — reference store backends for kvindex.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence), snapshot reads,
//!   serialized writers, optional index auto-population

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::InMemoryStore;
