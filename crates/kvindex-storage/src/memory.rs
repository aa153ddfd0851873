//! In-memory transactional store.
//!
//! Collections are ordered `BTreeMap`s. Readers get an immutable snapshot of
//! the last committed state; writers are serialized and work on a private
//! copy that is published only when the transaction closure succeeds.
//! All data is lost when the store is dropped.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use kvindex_core::error::IndexError;
use kvindex_core::store::{AutoPopulateIndex, Collection, ForwardCursor, KeyValue, Store, Tx};

type Keyspace = BTreeMap<Vec<u8>, Vec<u8>>;
type Collections = BTreeMap<Vec<u8>, Keyspace>;

/// In-memory key-value store with snapshot reads and serialized writes.
#[derive(Default)]
pub struct InMemoryStore {
    committed: RwLock<Arc<Collections>>,
    writer: Mutex<()>,
    auto_populate: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise index auto-population to `Index::initialize`.
    pub fn with_auto_populate(mut self, enabled: bool) -> Self {
        self.auto_populate = enabled;
        self
    }

    /// Number of keys in a collection, `None` if it does not exist.
    pub fn collection_len(&self, id: &[u8]) -> Result<Option<usize>, IndexError> {
        Ok(self.snapshot()?.get(id).map(BTreeMap::len))
    }

    fn snapshot(&self) -> Result<Arc<Collections>, IndexError> {
        self.committed
            .read()
            .map(|data| Arc::clone(&data))
            .map_err(|_| IndexError::Store("store lock poisoned".into()))
    }

    fn publish(&self, data: Collections) -> Result<(), IndexError> {
        let mut committed = self
            .committed
            .write()
            .map_err(|_| IndexError::Store("store lock poisoned".into()))?;
        *committed = Arc::new(data);
        Ok(())
    }
}

impl AutoPopulateIndex for InMemoryStore {
    fn auto_populate_index(&self) -> bool {
        self.auto_populate
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn view<F, T>(&self, f: F) -> Result<T, IndexError>
    where
        F: FnOnce(&dyn Tx) -> Result<T, IndexError> + Send,
        T: Send,
    {
        let tx = MemoryTx::Read(self.snapshot()?);
        f(&tx)
    }

    async fn update<F, T>(&self, f: F) -> Result<T, IndexError>
    where
        F: FnOnce(&dyn Tx) -> Result<T, IndexError> + Send,
        T: Send,
    {
        let _writer = self.writer.lock().await;
        let snapshot = self.snapshot()?;
        let working = Collections::clone(&snapshot);
        let tx = MemoryTx::Write(RefCell::new(working));

        let out = f(&tx)?;

        if let MemoryTx::Write(data) = tx {
            let data = data.into_inner();
            debug!(collections = data.len(), "update committed");
            self.publish(data)?;
        }
        Ok(out)
    }

    fn auto_populate(&self) -> Option<&dyn AutoPopulateIndex> {
        Some(self)
    }
}

// ─── Transactions ─────────────────────────────────────────────────────────────

enum MemoryTx {
    Read(Arc<Collections>),
    Write(RefCell<Collections>),
}

impl MemoryTx {
    fn read<R>(&self, id: &[u8], f: impl FnOnce(&Keyspace) -> R) -> Result<R, IndexError> {
        let missing = || IndexError::collection_not_found(id);
        match self {
            Self::Read(data) => data.get(id).map(f).ok_or_else(missing),
            Self::Write(data) => data.borrow().get(id).map(f).ok_or_else(missing),
        }
    }

    fn write<R>(&self, id: &[u8], f: impl FnOnce(&mut Keyspace) -> R) -> Result<R, IndexError> {
        match self {
            Self::Read(_) => Err(IndexError::ReadOnlyTransaction),
            Self::Write(data) => data
                .borrow_mut()
                .get_mut(id)
                .map(f)
                .ok_or_else(|| IndexError::collection_not_found(id)),
        }
    }
}

impl Tx for MemoryTx {
    fn collection<'a>(&'a self, id: &[u8]) -> Result<Box<dyn Collection + 'a>, IndexError> {
        self.read(id, |_| ())?;
        Ok(Box::new(MemoryCollection {
            tx: self,
            id: id.to_vec(),
        }))
    }

    fn create_collection(&self, id: &[u8]) -> Result<(), IndexError> {
        match self {
            Self::Read(_) => Err(IndexError::ReadOnlyTransaction),
            Self::Write(data) => {
                data.borrow_mut().entry(id.to_vec()).or_default();
                Ok(())
            }
        }
    }

    fn is_writable(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

struct MemoryCollection<'t> {
    tx: &'t MemoryTx,
    id: Vec<u8>,
}

impl Collection for MemoryCollection<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, IndexError> {
        self.tx
            .read(&self.id, |keys| keys.get(key).cloned())?
            .ok_or(IndexError::KeyNotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), IndexError> {
        self.tx.write(&self.id, |keys| {
            keys.insert(key.to_vec(), value.to_vec());
        })
    }

    fn delete(&self, key: &[u8]) -> Result<(), IndexError> {
        self.tx.write(&self.id, |keys| {
            keys.remove(key);
        })
    }

    fn forward_cursor<'a>(
        &'a self,
        seek: &[u8],
        prefix: Option<&[u8]>,
    ) -> Result<Box<dyn ForwardCursor + 'a>, IndexError> {
        let rows = self.tx.read(&self.id, |keys| {
            keys.range(seek.to_vec()..)
                .skip_while(|(k, _)| prefix.map_or(false, |p| k.as_slice() < p))
                .take_while(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>()
        })?;
        Ok(Box::new(MemoryCursor {
            rows: rows.into_iter(),
            closed: false,
        }))
    }
}

/// Cursor over rows materialized when it was opened.
struct MemoryCursor {
    rows: std::vec::IntoIter<KeyValue>,
    closed: bool,
}

impl ForwardCursor for MemoryCursor {
    fn next(&mut self) -> Option<KeyValue> {
        if self.closed {
            return None;
        }
        self.rows.next()
    }

    fn err(&mut self) -> Result<(), IndexError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), IndexError> {
        if self.closed {
            return Err(IndexError::Store("cursor closed twice".into()));
        }
        self.closed = true;
        Ok(())
    }
}
