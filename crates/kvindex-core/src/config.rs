//! Index configuration and its fluent builder.
//!
//! # Example
//!
//! ```rust
//! use kvindex_core::{IndexBuilder, KeyEncoding};
//!
//! let config = IndexBuilder::new()
//!     .populate_batch_size(500)
//!     .read_path_enabled(true)
//!     .key_encoding(KeyEncoding::Separator(b'/'))
//!     .build_config();
//! assert_eq!(config.populate_batch_size.get(), 500);
//! ```

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::key::KeyEncoding;

/// Entries written per transaction by `Index::populate`.
pub const DEFAULT_POPULATE_BATCH_SIZE: usize = 100;

fn default_populate_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_POPULATE_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN)
}

/// Configuration for an index instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of puts per write transaction during populate (default 100).
    pub populate_batch_size: NonZeroUsize,
    /// Whether `walk` reads the index at all (default `false`).
    /// Enable once the index is fully populated and the insert/delete paths
    /// are wired into every source write.
    pub read_path_enabled: bool,
    /// Composite key layout (default length-prefixed).
    pub key_encoding: KeyEncoding,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            populate_batch_size: default_populate_batch_size(),
            read_path_enabled: false,
            key_encoding: KeyEncoding::default(),
        }
    }
}

/// Fluent builder for [`IndexConfig`].
#[derive(Debug, Default)]
pub struct IndexBuilder {
    config: IndexConfig,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexConfig::default(),
        }
    }

    /// Set the number of entries per populate batch. Zero is clamped to one.
    pub fn populate_batch_size(mut self, size: usize) -> Self {
        self.config.populate_batch_size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        self
    }

    /// Enable or disable the read path (`walk`).
    pub fn read_path_enabled(mut self, enabled: bool) -> Self {
        self.config.read_path_enabled = enabled;
        self
    }

    /// Set the composite key layout.
    pub fn key_encoding(mut self, encoding: KeyEncoding) -> Self {
        self.config.key_encoding = encoding;
        self
    }

    /// Build the `IndexConfig`.
    pub fn build_config(self) -> IndexConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = IndexBuilder::new().build_config();
        assert_eq!(cfg.populate_batch_size.get(), 100);
        assert!(!cfg.read_path_enabled);
        assert_eq!(cfg.key_encoding, KeyEncoding::LengthPrefixed);
    }

    #[test]
    fn builder_custom() {
        let cfg = IndexBuilder::new()
            .populate_batch_size(0)
            .read_path_enabled(true)
            .key_encoding(KeyEncoding::Separator(b'/'))
            .build_config();

        assert_eq!(cfg.populate_batch_size.get(), 1);
        assert!(cfg.read_path_enabled);
        assert_eq!(cfg.key_encoding, KeyEncoding::Separator(b'/'));
    }

    #[test]
    fn config_from_json_fills_defaults() {
        let cfg: IndexConfig = serde_json::from_str(r#"{"read_path_enabled": true}"#).unwrap();
        assert!(cfg.read_path_enabled);
        assert_eq!(cfg.populate_batch_size.get(), DEFAULT_POPULATE_BATCH_SIZE);

        let err = serde_json::from_str::<IndexConfig>(r#"{"populate_batch_size": 0}"#);
        assert!(err.is_err());
    }
}
