//! Index mappings — which source collection is indexed into which index
//! collection, and how a foreign key is derived from a source value.

use std::fmt;
use std::sync::Arc;

use crate::error::DerivationError;

/// Describes a source collection, its index collection and the derivation
/// of foreign keys from source values.
///
/// `derive` must be deterministic and pure: the same value yields the same
/// foreign key across insert, populate and verify. Malformed values fail with
/// a [`DerivationError`] rather than falling back to a default key.
pub trait IndexMapping: Send + Sync {
    /// Collection holding the canonical records.
    fn source_collection(&self) -> &[u8];

    /// Collection holding the derived index entries.
    fn index_collection(&self) -> &[u8];

    /// Derive the foreign key of a source value.
    fn derive(&self, value: &[u8]) -> Result<Vec<u8>, DerivationError>;
}

/// Closure form of [`IndexMapping::derive`].
pub type DeriveFn = dyn Fn(&[u8]) -> Result<Vec<u8>, DerivationError> + Send + Sync;

/// [`IndexMapping`] backed by a derivation closure.
#[derive(Clone)]
pub struct FnIndexMapping {
    source: Vec<u8>,
    index: Vec<u8>,
    derive: Arc<DeriveFn>,
}

impl fmt::Debug for FnIndexMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnIndexMapping")
            .field("source", &String::from_utf8_lossy(&self.source))
            .field("index", &String::from_utf8_lossy(&self.index))
            .finish_non_exhaustive()
    }
}

impl IndexMapping for FnIndexMapping {
    fn source_collection(&self) -> &[u8] {
        &self.source
    }

    fn index_collection(&self) -> &[u8] {
        &self.index
    }

    fn derive(&self, value: &[u8]) -> Result<Vec<u8>, DerivationError> {
        (self.derive)(value)
    }
}

/// Build a mapping from `source` into `index` using `derive`.
///
/// ```rust
/// use kvindex_core::{new_index_mapping, DerivationError, IndexMapping};
///
/// let by_owner = new_index_mapping("authorizations", "authorizationsbyuser", |v: &[u8]| {
///     v.split(|b| *b == b':')
///         .next()
///         .filter(|owner| !owner.is_empty())
///         .map(<[u8]>::to_vec)
///         .ok_or_else(|| DerivationError::new("record has no owner"))
/// });
/// assert_eq!(by_owner.derive(b"u1:read").unwrap(), b"u1");
/// ```
pub fn new_index_mapping<F>(
    source: impl Into<Vec<u8>>,
    index: impl Into<Vec<u8>>,
    derive: F,
) -> FnIndexMapping
where
    F: Fn(&[u8]) -> Result<Vec<u8>, DerivationError> + Send + Sync + 'static,
{
    FnIndexMapping {
        source: source.into(),
        index: index.into(),
        derive: Arc::new(derive),
    }
}
