//! Error types for index maintenance, backfill and verification.

use thiserror::Error;

/// Raised by a derivation function when a source value cannot be mapped to a
/// foreign key (malformed record, missing field, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DerivationError {
    pub reason: String,
}

impl DerivationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while maintaining or reading an index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Storage error: {0}")]
    Store(String),

    #[error("Write attempted in a read-only transaction")]
    ReadOnlyTransaction,

    #[error("Collection not found: {collection}")]
    CollectionNotFound { collection: String },

    #[error("Key not found")]
    KeyNotFound,

    #[error("For key {primary_key} indexed by {foreign_key}: key not found")]
    DanglingEntry {
        foreign_key: String,
        primary_key: String,
    },

    #[error("Derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    #[error("Malformed index key: {0}")]
    MalformedKey(String),

    #[error("Foreign key {foreign_key} contains reserved separator byte 0x{separator:02x}")]
    ReservedSeparator { foreign_key: String, separator: u8 },

    #[error("Populate stopped after {inserted} inserted entries: {source}")]
    PartialPopulate {
        inserted: usize,
        #[source]
        source: Box<IndexError>,
    },
}

impl IndexError {
    /// Returns `true` for a missing key, including an index entry whose
    /// source record no longer exists.
    pub fn is_key_not_found(&self) -> bool {
        match self {
            Self::KeyNotFound | Self::DanglingEntry { .. } => true,
            Self::PartialPopulate { source, .. } => source.is_key_not_found(),
            _ => false,
        }
    }

    /// Returns `true` if an expected collection was never created.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::CollectionNotFound { .. } => true,
            Self::PartialPopulate { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Number of entries committed before a populate run failed.
    pub fn inserted_before_failure(&self) -> usize {
        match self {
            Self::PartialPopulate { inserted, .. } => *inserted,
            _ => 0,
        }
    }

    /// `CollectionNotFound` for a raw collection id.
    pub fn collection_not_found(id: &[u8]) -> Self {
        Self::CollectionNotFound {
            collection: String::from_utf8_lossy(id).into_owned(),
        }
    }
}
