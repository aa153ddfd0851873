//! Cross-reference join — drives a cursor over one collection and probes a
//! second collection for every row.
//!
//! For each row a mapping closure returns the key to look up plus a
//! continuation. The continuation receives the lookup outcome: the found
//! value, [`IndexError::KeyNotFound`], or any other store failure. Walk,
//! populate and verify all go through [`cross_reference`], so "missing" and
//! "broken" are told apart the same way everywhere.

use crate::error::IndexError;
use crate::key::KeyEncoding;
use crate::mapping::IndexMapping;
use crate::store::{Collection, ForwardCursor};

/// Outcome of probing the target collection.
pub type Lookup = Result<Vec<u8>, IndexError>;

/// Join every row of `cursor` against `target`.
///
/// `map_row(key, value)` yields `(lookup_key, continuation)`; the
/// continuation is called with `state` and the lookup outcome. Iteration
/// stops at the first error from `map_row`, a continuation or the cursor.
///
/// The cursor is closed exactly once. A loop error takes priority over a
/// close error; the close error is returned only when the loop succeeded.
pub fn cross_reference<'c, S, M, K>(
    mut cursor: Box<dyn ForwardCursor + 'c>,
    target: &dyn Collection,
    state: &mut S,
    map_row: M,
) -> Result<(), IndexError>
where
    S: ?Sized,
    M: FnMut(&[u8], &[u8]) -> Result<(Vec<u8>, K), IndexError>,
    K: FnOnce(&mut S, Lookup) -> Result<(), IndexError>,
{
    let joined = drive(cursor.as_mut(), target, state, map_row);
    let closed = cursor.close();
    joined.and(closed)
}

fn drive<S, M, K>(
    cursor: &mut (dyn ForwardCursor + '_),
    target: &dyn Collection,
    state: &mut S,
    mut map_row: M,
) -> Result<(), IndexError>
where
    S: ?Sized,
    M: FnMut(&[u8], &[u8]) -> Result<(Vec<u8>, K), IndexError>,
    K: FnOnce(&mut S, Lookup) -> Result<(), IndexError>,
{
    while let Some((key, value)) = cursor.next() {
        let (lookup_key, resolve) = map_row(&key, &value)?;
        let found = target.get(&lookup_key);
        resolve(state, found)?;
    }
    cursor.err()
}

/// Join index entries against the source collection.
///
/// `visit(primary_key, source_value)` runs for entries whose record exists;
/// `not_found(foreign_key, primary_key)` runs for entries whose record is
/// gone. Entries are `composite key → primary key`.
pub fn index_walk<'c, V, N>(
    index_cursor: Box<dyn ForwardCursor + 'c>,
    source: &dyn Collection,
    encoding: KeyEncoding,
    visit: V,
    not_found: N,
) -> Result<(), IndexError>
where
    V: FnMut(&[u8], &[u8]) -> Result<(), IndexError>,
    N: FnMut(&[u8], &[u8]) -> Result<(), IndexError>,
{
    let mut handlers = (visit, not_found);
    cross_reference(index_cursor, source, &mut handlers, |index_key, primary_key| {
        let index_key = index_key.to_vec();
        let primary_key = primary_key.to_vec();
        Ok((
            primary_key.clone(),
            move |(visit, not_found): &mut (V, N), found: Lookup| match found {
                Ok(value) => visit(&primary_key, &value),
                Err(IndexError::KeyNotFound) => {
                    let (fk, pk) = encoding.decode(&index_key)?;
                    not_found(fk, pk)
                }
                Err(err) => Err(err),
            },
        ))
    })
}

/// Join source records against the index collection.
///
/// For every record the expected composite key is derived through `mapping`;
/// `not_found(foreign_key, primary_key)` runs for records without an entry.
/// A derivation failure aborts the walk.
pub fn missing_index_walk<'c, N>(
    source_cursor: Box<dyn ForwardCursor + 'c>,
    index: &dyn Collection,
    mapping: &dyn IndexMapping,
    encoding: KeyEncoding,
    mut not_found: N,
) -> Result<(), IndexError>
where
    N: FnMut(&[u8], &[u8]) -> Result<(), IndexError>,
{
    cross_reference(source_cursor, index, &mut not_found, |primary_key, value| {
        let foreign_key = mapping.derive(value)?;
        let index_key = encoding.encode(&foreign_key, primary_key)?;
        let primary_key = primary_key.to_vec();
        Ok((
            index_key,
            move |not_found: &mut N, found: Lookup| match found {
                Ok(_) => Ok(()),
                Err(IndexError::KeyNotFound) => not_found(&foreign_key, &primary_key),
                Err(err) => Err(err),
            },
        ))
    })
}
