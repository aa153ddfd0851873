//! Secondary index over a source collection.
//!
//! An [`Index`] maps foreign keys derived from source values to the primary
//! keys of the records that produced them. Entries live in their own
//! collection as `composite(fk, pk) → pk`.
//!
//! # Rollout
//!
//! 1. Wire [`Index::insert`] / [`Index::delete`] into every source write, in
//!    the same transaction. Reads stay disabled, so [`Index::walk`] returns
//!    nothing.
//! 2. Backfill with [`Index::populate`] (or through [`Index::initialize`] on
//!    a store that advertises auto-population).
//! 3. Check [`Index::verify`], then enable the read path.
//!
//! # Example
//!
//! ```rust,no_run
//! use kvindex_core::{new_index_mapping, DerivationError, Index, IndexBuilder, Store};
//!
//! # async fn example<S: Store>(store: &S) -> Result<(), kvindex_core::IndexError> {
//! let by_user = Index::new(
//!     new_index_mapping("authorizations", "authorizationsbyuserv1", |v: &[u8]| {
//!         v.split(|b| *b == b':')
//!             .next()
//!             .map(<[u8]>::to_vec)
//!             .ok_or_else(|| DerivationError::new("no user"))
//!     }),
//!     IndexBuilder::new().populate_batch_size(250).build_config(),
//! );
//!
//! by_user.initialize(store).await?;
//! by_user.populate(store).await?;
//! let diff = store.view(|tx| by_user.verify(tx)).await?;
//! for user in diff.corrupt() {
//!     eprintln!("partially indexed: {user}");
//! }
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::diff::IndexDiff;
use crate::error::IndexError;
use crate::join::{self, Lookup};
use crate::mapping::IndexMapping;
use crate::store::{Collection, Store, Tx};

/// A `(foreign key, primary key)` pair.
type Pair = (Vec<u8>, Vec<u8>);

/// Maintains, reads, backfills and verifies one index mapping.
pub struct Index {
    mapping: Arc<dyn IndexMapping>,
    config: IndexConfig,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("source", &self.source_name())
            .field("index", &self.index_name())
            .field("config", &self.config)
            .finish()
    }
}

impl Index {
    /// Bind an index to `mapping`. Use [`IndexConfig::default`] for a
    /// write-only index with batches of 100.
    pub fn new(mapping: impl IndexMapping + 'static, config: IndexConfig) -> Self {
        Self {
            mapping: Arc::new(mapping),
            config,
        }
    }

    /// Create the index collection if needed. When the store advertises
    /// auto-population, also run a full [`Index::populate`].
    pub async fn initialize<S: Store>(&self, store: &S) -> Result<(), IndexError> {
        let index_id = self.mapping.index_collection();
        store.update(|tx| tx.create_collection(index_id)).await?;
        debug!(index = %self.index_name(), "index collection ready");

        if let Some(capability) = store.auto_populate() {
            if capability.auto_populate_index() {
                self.populate(store).await?;
            }
        }
        Ok(())
    }

    /// Write the entry for `(foreign_key, primary_key)`. Idempotent. Fails
    /// with [`IndexError::ReadOnlyTransaction`] inside a read transaction.
    pub fn insert(
        &self,
        tx: &dyn Tx,
        foreign_key: &[u8],
        primary_key: &[u8],
    ) -> Result<(), IndexError> {
        writable(tx)?;
        let key = self.config.key_encoding.encode(foreign_key, primary_key)?;
        self.index_collection(tx)?.put(&key, primary_key)
    }

    /// Remove the entry for `(foreign_key, primary_key)`. Removing an absent
    /// entry is not an error.
    pub fn delete(
        &self,
        tx: &dyn Tx,
        foreign_key: &[u8],
        primary_key: &[u8],
    ) -> Result<(), IndexError> {
        writable(tx)?;
        let key = self.config.key_encoding.encode(foreign_key, primary_key)?;
        self.index_collection(tx)?.delete(&key)
    }

    /// Visit every source record indexed under `foreign_key`, in ascending
    /// primary-key order.
    ///
    /// Does nothing while the read path is disabled. An entry whose source
    /// record is missing fails the whole walk with
    /// [`IndexError::DanglingEntry`].
    pub fn walk<V>(&self, tx: &dyn Tx, foreign_key: &[u8], visit: V) -> Result<(), IndexError>
    where
        V: FnMut(&[u8], &[u8]) -> Result<(), IndexError>,
    {
        if !self.config.read_path_enabled {
            return Ok(());
        }

        let source = self.source_collection(tx)?;
        let index = self.index_collection(tx)?;
        let prefix = self.config.key_encoding.prefix(foreign_key)?;
        let cursor = index.forward_cursor(&prefix, Some(prefix.as_slice()))?;

        join::index_walk(cursor, source.as_ref(), self.config.key_encoding, visit, |fk, pk| {
            Err(IndexError::DanglingEntry {
                foreign_key: String::from_utf8_lossy(fk).into_owned(),
                primary_key: String::from_utf8_lossy(pk).into_owned(),
            })
        })
    }

    /// Backfill every entry missing from the index. Returns the number of
    /// entries written.
    ///
    /// Missing entries are collected on one read snapshot, then written in
    /// batches of `populate_batch_size`, each in its own transaction. A failed
    /// batch stops the run with [`IndexError::PartialPopulate`]; earlier
    /// batches stay committed and a rerun only writes what is still missing.
    pub async fn populate<S: Store>(&self, store: &S) -> Result<usize, IndexError> {
        let missing = store.view(|tx| self.collect_missing(tx)).await?;
        let batch_size = self.config.populate_batch_size.get();

        info!(
            index = %self.index_name(),
            missing = missing.len(),
            batch_size,
            "Populating index"
        );

        let mut inserted = 0;
        for (n, batch) in missing.chunks(batch_size).enumerate() {
            match store.update(|tx| self.write_batch(tx, batch)).await {
                Ok(written) => {
                    inserted += written;
                    debug!(index = %self.index_name(), batch = n, written, inserted, "batch committed");
                }
                Err(err) => {
                    warn!(
                        index = %self.index_name(),
                        batch = n,
                        inserted,
                        error = %err,
                        "populate batch failed"
                    );
                    return Err(IndexError::PartialPopulate {
                        inserted,
                        source: Box::new(err),
                    });
                }
            }
        }

        info!(index = %self.index_name(), inserted, "Index populated");
        Ok(inserted)
    }

    /// Reconcile the index against its source within `tx`. Read-only; any
    /// store or derivation failure aborts without a partial diff.
    pub fn verify(&self, tx: &dyn Tx) -> Result<IndexDiff, IndexError> {
        let source = self.source_collection(tx)?;
        let index = self.index_collection(tx)?;
        let encoding = self.config.key_encoding;
        let mapping = self.mapping.as_ref();
        let mut diff = IndexDiff::default();

        // index → source: stale entries
        let cursor = index.forward_cursor(&[], None)?;
        join::cross_reference(cursor, source.as_ref(), &mut diff, |index_key, primary_key| {
            let (fk, pk) = encoding.decode(index_key)?;
            let (fk, pk) = (fk.to_vec(), pk.to_vec());
            Ok((
                primary_key.to_vec(),
                move |diff: &mut IndexDiff, found: Lookup| match found {
                    Ok(value) => {
                        diff.add_present(&fk, &pk);
                        if mapping.derive(&value)? != fk {
                            diff.add_misfiled(&fk, &pk);
                        }
                        Ok(())
                    }
                    Err(IndexError::KeyNotFound) => {
                        diff.add_missing_from_source(&fk, &pk);
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
            ))
        })?;

        // source → index: entries never written
        let cursor = source.forward_cursor(&[], None)?;
        join::missing_index_walk(cursor, index.as_ref(), mapping, encoding, |fk, pk| {
            diff.add_missing_from_index(fk, pk);
            Ok(())
        })?;

        let corrupt = diff.corrupt();
        for fk in &corrupt {
            warn!(index = %self.index_name(), foreign_key = %fk, "partially indexed foreign key");
        }
        info!(
            index = %self.index_name(),
            present = diff.present_in_index.len(),
            missing_from_index = diff.missing_from_index.len(),
            missing_from_source = diff.missing_from_source.len(),
            misfiled = diff.misfiled_in_index.len(),
            corrupt = corrupt.len(),
            "Index verified"
        );
        Ok(diff)
    }

    fn collect_missing(&self, tx: &dyn Tx) -> Result<Vec<Pair>, IndexError> {
        let source = self.source_collection(tx)?;
        let index = self.index_collection(tx)?;
        let cursor = source.forward_cursor(&[], None)?;

        let mut missing = Vec::new();
        join::missing_index_walk(
            cursor,
            index.as_ref(),
            self.mapping.as_ref(),
            self.config.key_encoding,
            |fk, pk| {
                missing.push((fk.to_vec(), pk.to_vec()));
                Ok(())
            },
        )?;
        Ok(missing)
    }

    fn write_batch(&self, tx: &dyn Tx, batch: &[Pair]) -> Result<usize, IndexError> {
        let index = self.index_collection(tx)?;
        for (fk, pk) in batch {
            let key = self.config.key_encoding.encode(fk, pk)?;
            index.put(&key, pk)?;
        }
        Ok(batch.len())
    }

    fn source_collection<'t>(&self, tx: &'t dyn Tx) -> Result<Box<dyn Collection + 't>, IndexError> {
        tx.collection(self.mapping.source_collection())
    }

    fn index_collection<'t>(&self, tx: &'t dyn Tx) -> Result<Box<dyn Collection + 't>, IndexError> {
        tx.collection(self.mapping.index_collection())
    }

    fn source_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.mapping.source_collection())
    }

    fn index_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.mapping.index_collection())
    }
}

fn writable(tx: &dyn Tx) -> Result<(), IndexError> {
    if tx.is_writable() {
        Ok(())
    } else {
        Err(IndexError::ReadOnlyTransaction)
    }
}
