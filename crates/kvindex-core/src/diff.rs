//! Result of reconciling an index against its source collection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Foreign key → primary keys, both rendered as (lossy) UTF-8.
pub type KeyGroups = BTreeMap<String, Vec<String>>;

/// Divergence between a source collection and its index, as produced by
/// `Index::verify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDiff {
    /// Index entries whose source record exists, grouped by the foreign key
    /// the entry is filed under. An entry left under a stale foreign key is
    /// counted here under that old key and also listed in
    /// `misfiled_in_index`.
    pub present_in_index: KeyGroups,
    /// Source records with no index entry. Either a backfill has not run yet
    /// or the create path does not write the index.
    pub missing_from_index: KeyGroups,
    /// Index entries whose source record is gone. The delete path did not
    /// remove them.
    pub missing_from_source: KeyGroups,
    /// Index entries whose foreign key no longer matches the one derived from
    /// the source record (the record moved to another foreign key and the
    /// old entry was left behind). Grouped by the entry's foreign key.
    pub misfiled_in_index: KeyGroups,
}

impl IndexDiff {
    pub(crate) fn add_present(&mut self, fk: &[u8], pk: &[u8]) {
        push(&mut self.present_in_index, fk, pk);
    }

    pub(crate) fn add_missing_from_index(&mut self, fk: &[u8], pk: &[u8]) {
        push(&mut self.missing_from_index, fk, pk);
    }

    pub(crate) fn add_missing_from_source(&mut self, fk: &[u8], pk: &[u8]) {
        push(&mut self.missing_from_source, fk, pk);
    }

    pub(crate) fn add_misfiled(&mut self, fk: &[u8], pk: &[u8]) {
        push(&mut self.misfiled_in_index, fk, pk);
    }

    /// Foreign keys whose index holds only part of their primary keys.
    ///
    /// A foreign key that is fully indexed, or not indexed at all, is not
    /// corrupt.
    pub fn corrupt(&self) -> Vec<String> {
        self.missing_from_index
            .keys()
            .filter(|fk| self.present_in_index.contains_key(*fk))
            .cloned()
            .collect()
    }

    /// `true` when the index mirrors the source exactly.
    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty()
            && self.missing_from_source.is_empty()
            && self.misfiled_in_index.is_empty()
    }
}

fn push(groups: &mut KeyGroups, fk: &[u8], pk: &[u8]) {
    groups
        .entry(String::from_utf8_lossy(fk).into_owned())
        .or_default()
        .push(String::from_utf8_lossy(pk).into_owned());
}
