//! End-to-end index behaviour against the in-memory store: write path,
//! gated reads, backfill, and reconciliation.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kvindex_core::{
    new_index_mapping, DerivationError, FnIndexMapping, Index, IndexBuilder, IndexConfig,
    IndexDiff, IndexError, KeyEncoding, Store, Tx,
};
use kvindex_storage::InMemoryStore;

const SOURCE: &[u8] = b"authorizationsv1";
const INDEX: &[u8] = b"authorizationsbyuserv1";

#[derive(Debug, Serialize, Deserialize)]
struct Authorization {
    id: String,
    user: String,
}

fn by_user() -> FnIndexMapping {
    new_index_mapping(SOURCE, INDEX, |v: &[u8]| {
        serde_json::from_slice::<Authorization>(v)
            .map(|auth| auth.user.into_bytes())
            .map_err(|e| DerivationError::new(e.to_string()))
    })
}

fn write_only() -> Index {
    Index::new(by_user(), IndexConfig::default())
}

fn readable() -> Index {
    Index::new(by_user(), IndexBuilder::new().read_path_enabled(true).build_config())
}

async fn put_records(store: &InMemoryStore, records: &[(&str, &str)]) {
    store
        .update(|tx| {
            tx.create_collection(SOURCE)?;
            let source = tx.collection(SOURCE)?;
            for (id, user) in records {
                let body = serde_json::to_vec(&Authorization {
                    id: id.to_string(),
                    user: user.to_string(),
                })
                .unwrap();
                source.put(id.as_bytes(), &body)?;
            }
            Ok(())
        })
        .await
        .unwrap();
}

/// `{a1: u1, a2: u1, a3: u2}` with an initialized, empty index.
async fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    put_records(&store, &[("a1", "u1"), ("a2", "u1"), ("a3", "u2")]).await;
    write_only().initialize(&store).await.unwrap();
    store
}

async fn walked(store: &InMemoryStore, index: &Index, user: &str) -> Result<Vec<String>, IndexError> {
    store
        .view(|tx| {
            let mut seen = Vec::new();
            index.walk(tx, user.as_bytes(), |pk, body| {
                let auth: Authorization =
                    serde_json::from_slice(body).map_err(|e| IndexError::Store(e.to_string()))?;
                assert_eq!(auth.id.as_bytes(), pk);
                seen.push(auth.id);
                Ok(())
            })?;
            Ok(seen)
        })
        .await
}

async fn verified(store: &InMemoryStore) -> Result<IndexDiff, IndexError> {
    let index = write_only();
    store.view(|tx| index.verify(tx)).await
}

fn index_len(store: &InMemoryStore) -> usize {
    store.collection_len(INDEX).unwrap().unwrap_or(0)
}

// ─── Write path ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_is_idempotent() {
    let store = seeded_store().await;
    let index = write_only();

    store
        .update(|tx| {
            index.insert(tx, b"u1", b"a1")?;
            index.insert(tx, b"u1", b"a1")
        })
        .await
        .unwrap();
    store.update(|tx| index.insert(tx, b"u1", b"a1")).await.unwrap();

    assert_eq!(index_len(&store), 1);
}

#[tokio::test]
async fn delete_of_absent_entry_is_a_noop() {
    let store = seeded_store().await;
    let index = write_only();

    store.update(|tx| index.delete(tx, b"u9", b"a9")).await.unwrap();

    store.update(|tx| index.insert(tx, b"u1", b"a1")).await.unwrap();
    store
        .update(|tx| {
            index.delete(tx, b"u1", b"a1")?;
            index.delete(tx, b"u1", b"a1")
        })
        .await
        .unwrap();
    assert_eq!(index_len(&store), 0);
}

#[tokio::test]
async fn insert_before_initialize_fails_with_not_found() {
    let store = InMemoryStore::new();
    let err = store
        .update(|tx| write_only().insert(tx, b"u1", b"a1"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn insert_in_read_only_transaction_fails() {
    let store = seeded_store().await;
    let err = store
        .view(|tx| write_only().insert(tx, b"u1", b"a1"))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::ReadOnlyTransaction));
}

// ─── Read path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn walk_is_gated_until_reads_are_enabled() {
    let store = seeded_store().await;
    write_only().populate(&store).await.unwrap();

    assert!(walked(&store, &write_only(), "u1").await.unwrap().is_empty());

    // Gated even when the index is corrupt or missing entirely.
    store
        .update(|tx| tx.collection(SOURCE)?.delete(b"a1"))
        .await
        .unwrap();
    assert!(walked(&store, &write_only(), "u1").await.unwrap().is_empty());
    assert!(walked(&InMemoryStore::new(), &write_only(), "u1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn walk_visits_in_primary_key_order() {
    let store = seeded_store().await;
    write_only().populate(&store).await.unwrap();

    let index = readable();
    assert_eq!(walked(&store, &index, "u1").await.unwrap(), vec!["a1", "a2"]);
    assert_eq!(walked(&store, &index, "u2").await.unwrap(), vec!["a3"]);
    assert!(walked(&store, &index, "u3").await.unwrap().is_empty());
}

#[tokio::test]
async fn walk_does_not_bleed_into_longer_foreign_keys() {
    let store = InMemoryStore::new();
    put_records(&store, &[("a1", "u1"), ("a2", "u10"), ("a3", "u1")]).await;
    let index = readable();
    index.initialize(&store).await.unwrap();
    index.populate(&store).await.unwrap();

    assert_eq!(walked(&store, &index, "u1").await.unwrap(), vec!["a1", "a3"]);
    assert_eq!(walked(&store, &index, "u10").await.unwrap(), vec!["a2"]);
}

#[tokio::test]
async fn walk_fails_on_entry_without_source_record() {
    let store = seeded_store().await;
    write_only().populate(&store).await.unwrap();
    store
        .update(|tx| tx.collection(SOURCE)?.delete(b"a3"))
        .await
        .unwrap();

    let err = walked(&store, &readable(), "u2").await.unwrap_err();
    assert!(err.is_key_not_found());
    match err {
        IndexError::DanglingEntry {
            foreign_key,
            primary_key,
        } => {
            assert_eq!(foreign_key, "u2");
            assert_eq!(primary_key, "a3");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ─── Backfill ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn populate_backfills_then_finds_nothing_to_do() {
    let store = seeded_store().await;
    let index = write_only();

    assert_eq!(index.populate(&store).await.unwrap(), 3);
    assert_eq!(index.populate(&store).await.unwrap(), 0);
    assert_eq!(index_len(&store), 3);
}

#[tokio::test]
async fn populate_only_writes_missing_entries() {
    let store = seeded_store().await;
    let index = write_only();
    store.update(|tx| index.insert(tx, b"u1", b"a2")).await.unwrap();

    assert_eq!(index.populate(&store).await.unwrap(), 2);
    assert!(verified(&store).await.unwrap().is_consistent());
}

#[tokio::test]
async fn populate_aborts_on_malformed_record() {
    let store = seeded_store().await;
    store
        .update(|tx| tx.collection(SOURCE)?.put(b"a0", b"not json"))
        .await
        .unwrap();

    let err = write_only().populate(&store).await.unwrap_err();
    assert!(matches!(err, IndexError::Derivation(_)));
    assert_eq!(index_len(&store), 0);
}

#[tokio::test]
async fn populate_requires_source_collection() {
    let store = InMemoryStore::new();
    let index = write_only();
    index.initialize(&store).await.unwrap();

    let err = index.populate(&store).await.unwrap_err();
    assert!(matches!(err, IndexError::CollectionNotFound { ref collection } if collection == "authorizationsv1"));
}

/// Delegates to an [`InMemoryStore`] and fails the `fail_at`-th update.
struct FlakyStore {
    inner: InMemoryStore,
    updates: AtomicUsize,
    fail_at: usize,
}

#[async_trait]
impl Store for FlakyStore {
    async fn view<F, T>(&self, f: F) -> Result<T, IndexError>
    where
        F: FnOnce(&dyn Tx) -> Result<T, IndexError> + Send,
        T: Send,
    {
        self.inner.view(f).await
    }

    async fn update<F, T>(&self, f: F) -> Result<T, IndexError>
    where
        F: FnOnce(&dyn Tx) -> Result<T, IndexError> + Send,
        T: Send,
    {
        if self.updates.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(IndexError::Store("injected commit failure".into()));
        }
        self.inner.update(f).await
    }
}

#[tokio::test]
async fn interrupted_populate_keeps_committed_batches_and_resumes() {
    let inner = InMemoryStore::new();
    put_records(
        &inner,
        &[("a1", "u1"), ("a2", "u1"), ("a3", "u2"), ("a4", "u2"), ("a5", "u3")],
    )
    .await;
    write_only().initialize(&inner).await.unwrap();

    let store = FlakyStore {
        inner,
        updates: AtomicUsize::new(0),
        fail_at: 1,
    };
    let index = Index::new(by_user(), IndexBuilder::new().populate_batch_size(2).build_config());

    let err = index.populate(&store).await.unwrap_err();
    assert!(matches!(err, IndexError::PartialPopulate { inserted: 2, .. }));
    assert_eq!(err.inserted_before_failure(), 2);
    assert_eq!(index_len(&store.inner), 2);

    let diff = store.view(|tx| index.verify(tx)).await.unwrap();
    assert_eq!(diff.present_in_index["u1"], vec!["a1", "a2"]);
    assert_eq!(diff.missing_from_index["u2"], vec!["a3", "a4"]);

    assert_eq!(index.populate(&store).await.unwrap(), 3);
    assert_eq!(index.populate(&store).await.unwrap(), 0);
    assert!(store.view(|tx| index.verify(tx)).await.unwrap().is_consistent());
}

// ─── Initialize ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_creates_index_without_populating_by_default() {
    let store = InMemoryStore::new();
    put_records(&store, &[("a1", "u1")]).await;
    let index = write_only();

    index.initialize(&store).await.unwrap();
    index.initialize(&store).await.unwrap();

    assert_eq!(store.collection_len(INDEX).unwrap(), Some(0));
}

#[tokio::test]
async fn initialize_populates_when_store_asks_for_it() {
    let store = InMemoryStore::new().with_auto_populate(true);
    put_records(&store, &[("a1", "u1"), ("a2", "u1"), ("a3", "u2")]).await;

    write_only().initialize(&store).await.unwrap();

    assert_eq!(index_len(&store), 3);
}

#[tokio::test]
async fn initialize_propagates_populate_errors() {
    let store = InMemoryStore::new().with_auto_populate(true);
    let err = write_only().initialize(&store).await.unwrap_err();
    assert!(err.is_not_found());
}

// ─── Verify ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn verify_reports_entry_missing_from_index() {
    let store = seeded_store().await;
    let index = write_only();
    index.populate(&store).await.unwrap();
    store.update(|tx| index.delete(tx, b"u2", b"a3")).await.unwrap();

    let diff = verified(&store).await.unwrap();
    assert_eq!(diff.missing_from_index["u2"], vec!["a3"]);
    assert!(diff.missing_from_source.is_empty());
    assert_eq!(diff.present_in_index["u1"], vec!["a1", "a2"]);
    // u2 is not indexed at all, which is not corruption.
    assert!(diff.corrupt().is_empty());
}

#[tokio::test]
async fn verify_reports_stale_entry_missing_from_source() {
    let store = seeded_store().await;
    let index = write_only();
    index.populate(&store).await.unwrap();
    store
        .update(|tx| tx.collection(SOURCE)?.delete(b"a3"))
        .await
        .unwrap();

    let diff = verified(&store).await.unwrap();
    assert_eq!(diff.missing_from_source["u2"], vec!["a3"]);
    assert!(diff.missing_from_index.is_empty());
    assert!(!diff.present_in_index.contains_key("u2"));
    assert!(!diff.is_consistent());
}

#[tokio::test]
async fn verify_flags_partially_indexed_foreign_keys() {
    let store = seeded_store().await;
    let index = write_only();
    index.populate(&store).await.unwrap();
    put_records(&store, &[("b1", "u3"), ("b2", "u3")]).await;
    store.update(|tx| index.insert(tx, b"u3", b"b1")).await.unwrap();

    let diff = verified(&store).await.unwrap();
    assert_eq!(diff.present_in_index["u3"], vec!["b1"]);
    assert_eq!(diff.missing_from_index["u3"], vec!["b2"]);
    assert_eq!(diff.corrupt(), vec!["u3".to_string()]);
}

#[tokio::test]
async fn verify_reports_entries_left_under_old_foreign_key() {
    let store = seeded_store().await;
    write_only().populate(&store).await.unwrap();
    // a1 moves from u1 to u2 without touching the index.
    put_records(&store, &[("a1", "u2")]).await;

    let diff = verified(&store).await.unwrap();
    assert_eq!(diff.present_in_index["u1"], vec!["a1", "a2"]);
    assert_eq!(diff.present_in_index["u2"], vec!["a3"]);
    assert_eq!(diff.misfiled_in_index["u1"], vec!["a1"]);
    assert_eq!(diff.missing_from_index["u2"], vec!["a1"]);
    assert_eq!(diff.corrupt(), vec!["u2".to_string()]);
}

#[tokio::test]
async fn verify_of_clean_index_is_consistent() {
    let store = seeded_store().await;
    write_only().populate(&store).await.unwrap();

    let diff = verified(&store).await.unwrap();
    assert!(diff.is_consistent());
    assert_eq!(diff.present_in_index.len(), 2);
}

#[tokio::test]
async fn verify_aborts_on_malformed_record() {
    let store = seeded_store().await;
    write_only().populate(&store).await.unwrap();
    store
        .update(|tx| tx.collection(SOURCE)?.put(b"a2", b"{\"id\":\"a2\"}"))
        .await
        .unwrap();

    let err = verified(&store).await.unwrap_err();
    assert!(matches!(err, IndexError::Derivation(_)));
}

// ─── Key layout ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn separator_layout_writes_legacy_keys() {
    let store = seeded_store().await;
    let index = Index::new(
        by_user(),
        IndexBuilder::new()
            .key_encoding(KeyEncoding::Separator(b'/'))
            .read_path_enabled(true)
            .build_config(),
    );
    assert_eq!(index.populate(&store).await.unwrap(), 3);

    let value = store
        .view(|tx| tx.collection(INDEX)?.get(b"u1/a2"))
        .await
        .unwrap();
    assert_eq!(value, b"a2");
    assert_eq!(walked(&store, &index, "u1").await.unwrap(), vec!["a1", "a2"]);
}

#[tokio::test]
async fn separator_layout_rejects_foreign_keys_containing_separator() {
    let store = InMemoryStore::new();
    put_records(&store, &[("a1", "org/u1")]).await;
    let index = Index::new(
        by_user(),
        IndexBuilder::new()
            .key_encoding(KeyEncoding::Separator(b'/'))
            .build_config(),
    );
    index.initialize(&store).await.unwrap();

    let err = index.populate(&store).await.unwrap_err();
    assert!(matches!(err, IndexError::ReservedSeparator { separator: b'/', .. }));

    // The default layout indexes the same record.
    assert_eq!(write_only().populate(&store).await.unwrap(), 1);
}
