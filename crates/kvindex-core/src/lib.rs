//! kvindex-core — secondary indexes over transactional key-value stores.
//!
//! # Architecture
//!
//! ```text
//! Index (IndexMapping + IndexConfig)
//!   ├── insert / delete   (caller's write transaction)
//!   ├── walk              (index → source join, read path gated)
//!   ├── populate          (source → index join, batched backfill)
//!   └── verify → IndexDiff (both joins on one snapshot)
//!         │
//!         └── join::cross_reference over Store / Tx / Collection / ForwardCursor
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod index;
pub mod join;
pub mod key;
pub mod mapping;
pub mod store;

pub use config::{IndexBuilder, IndexConfig, DEFAULT_POPULATE_BATCH_SIZE};
pub use diff::{IndexDiff, KeyGroups};
pub use error::{DerivationError, IndexError};
pub use index::Index;
pub use key::KeyEncoding;
pub use mapping::{new_index_mapping, FnIndexMapping, IndexMapping};
pub use store::{AutoPopulateIndex, Collection, ForwardCursor, KeyValue, Store, Tx};
