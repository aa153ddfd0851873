//! Transactional key-value store abstraction consumed by [`Index`](crate::Index).
//!
//! A [`Store`] hands out read-only ([`Store::view`]) and read-write
//! ([`Store::update`]) transactions. Each transaction exposes named
//! [`Collection`]s of ordered byte keys, and collections hand out
//! [`ForwardCursor`]s that iterate in ascending key order.
//!
//! Stores may additionally implement [`AutoPopulateIndex`] and advertise it
//! through [`Store::auto_populate`]; `Index::initialize` probes that
//! capability and never assumes it.

use async_trait::async_trait;

use crate::error::IndexError;

/// A key/value pair yielded by a cursor.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Forward iterator over a collection, in ascending key order.
///
/// `close` must be called exactly once. It is safe to call after the cursor
/// is exhausted.
pub trait ForwardCursor {
    /// Next pair, or `None` when exhausted (or after an iteration failure).
    fn next(&mut self) -> Option<KeyValue>;

    /// Iteration failure, if any, observed by `next`.
    fn err(&mut self) -> Result<(), IndexError>;

    /// Release the cursor.
    fn close(&mut self) -> Result<(), IndexError>;
}

/// A named, ordered keyspace inside a transaction.
pub trait Collection {
    /// Fetch a value. Fails with [`IndexError::KeyNotFound`] when absent.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, IndexError>;

    /// Upsert a value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), IndexError>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), IndexError>;

    /// Open a cursor positioned at the first key `>= seek`, optionally
    /// restricted to keys starting with `prefix`.
    fn forward_cursor<'a>(
        &'a self,
        seek: &[u8],
        prefix: Option<&[u8]>,
    ) -> Result<Box<dyn ForwardCursor + 'a>, IndexError>;
}

/// A store transaction.
pub trait Tx {
    /// Open an existing collection. Fails with
    /// [`IndexError::CollectionNotFound`] if it was never created.
    fn collection<'a>(&'a self, id: &[u8]) -> Result<Box<dyn Collection + 'a>, IndexError>;

    /// Create a collection if it does not exist yet.
    fn create_collection(&self, id: &[u8]) -> Result<(), IndexError>;

    /// `false` for transactions opened through [`Store::view`].
    fn is_writable(&self) -> bool;
}

/// Optional store capability: populate indexes as part of initialization.
pub trait AutoPopulateIndex: Send + Sync {
    fn auto_populate_index(&self) -> bool;
}

/// Transactional store.
///
/// Both methods run `f` inside a transaction and propagate its error, or the
/// commit failure for [`Store::update`]. An update whose closure fails is
/// discarded.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run `f` in a read-only transaction over one consistent snapshot.
    async fn view<F, T>(&self, f: F) -> Result<T, IndexError>
    where
        F: FnOnce(&dyn Tx) -> Result<T, IndexError> + Send,
        T: Send;

    /// Run `f` in a read-write transaction.
    async fn update<F, T>(&self, f: F) -> Result<T, IndexError>
    where
        F: FnOnce(&dyn Tx) -> Result<T, IndexError> + Send,
        T: Send;

    /// The auto-populate capability, when the store implements it.
    fn auto_populate(&self) -> Option<&dyn AutoPopulateIndex> {
        None
    }
}
