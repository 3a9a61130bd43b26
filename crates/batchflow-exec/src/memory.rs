//! In-process [`PagedReader`] and [`TableWriter`] used by tests and small local runs.
//!
//! Rows are kept per table ordered by `(token, rowid)`, where the token is a mix of the rowid,
//! so token-range batches spread rows the way a hash-partitioned backend would. Faults can be
//! scripted to exercise the writer's retry paths.
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use batchflow_eval::ScalarValue;
use batchflow_schema::TableRecord;

use crate::store::{
    DataRow, IndexEntry, IndexPage, InsertOutcome, LeftPage, PageState, PagedReader, StoreError,
    StoreErrorKind, StoreResult, TableWriter,
};

#[derive(Debug, Default)]
struct MemTable {
    rows: BTreeMap<(i64, i64), HashMap<String, ScalarValue>>,
    tokens: HashMap<i64, i64>,
    /// Rowids reported as taken by an injected collision; they stay taken.
    collided: BTreeSet<i64>,
}

#[derive(Debug, Default)]
struct MemIndex {
    entries: BTreeMap<String, BTreeSet<i64>>,
}

#[derive(Debug, Default)]
struct Faults {
    data: VecDeque<StoreErrorKind>,
    index: VecDeque<StoreErrorKind>,
    rowid_collisions: usize,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, MemTable>,
    indexes: HashMap<String, MemIndex>,
    faults: Faults,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

/// Token of a rowid: a bijective 64-bit mix, so distinct rowids never share a token.
pub fn token_of(rowid: i64) -> i64 {
    let mut z = rowid as u64;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    z as i64
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_table(&self, name: &str) {
        self.lock().tables.entry(name.to_string()).or_default();
    }

    pub fn create_index(&self, name: &str) {
        self.lock().indexes.entry(name.to_string()).or_default();
    }

    /// Stores a row directly, bypassing fault injection. Creates the table if needed.
    pub fn put_row(&self, table: &str, rowid: i64, values: HashMap<String, ScalarValue>) {
        let mut inner = self.lock();
        let table = inner.tables.entry(table.to_string()).or_default();
        let token = token_of(rowid);
        table.tokens.insert(rowid, token);
        table.rows.insert((token, rowid), values);
    }

    /// Adds an index entry directly. Creates the index if needed.
    pub fn put_index_entry(&self, index: &str, key: &str, rowid: i64) {
        self.lock()
            .indexes
            .entry(index.to_string())
            .or_default()
            .entries
            .entry(key.to_string())
            .or_default()
            .insert(rowid);
    }

    /// Makes the next data inserts fail with `kinds`, one per call.
    pub fn fail_next_data_inserts(&self, kinds: impl IntoIterator<Item = StoreErrorKind>) {
        self.lock().faults.data.extend(kinds);
    }

    /// Makes the next index inserts fail with `kinds`, one per call.
    pub fn fail_next_index_inserts(&self, kinds: impl IntoIterator<Item = StoreErrorKind>) {
        self.lock().faults.index.extend(kinds);
    }

    /// Makes the next `count` data inserts report that their rowid is already taken. A rowid
    /// reported this way keeps colliding on later inserts.
    pub fn collide_next_rowids(&self, count: usize) {
        self.lock().faults.rowid_collisions += count;
    }

    /// Rowids of `table` that were refused by an injected collision.
    pub fn collided_rowids(&self, table: &str) -> Vec<i64> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.collided.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Every row of `table` ordered by rowid.
    pub fn rows(&self, table: &str) -> Vec<DataRow> {
        let inner = self.lock();
        let mut rows: Vec<DataRow> = inner
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|((_, rowid), values)| DataRow {
                        rowid: *rowid,
                        values: values.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|r| r.rowid);
        rows
    }

    /// Every entry of `index` ordered by key then rowid.
    pub fn index_entries(&self, index: &str) -> Vec<IndexEntry> {
        let inner = self.lock();
        inner
            .indexes
            .get(index)
            .map(|idx| {
                idx.entries
                    .iter()
                    .flat_map(|(key, rowids)| {
                        rowids.iter().map(|rowid| IndexEntry {
                            key: key.clone(),
                            rowid: *rowid,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn missing(kind: &str, name: &str) -> StoreError {
    StoreError::new(
        StoreErrorKind::TableDoesNotExist,
        format!("{kind} {name} does not exist"),
    )
}

fn injected(kind: StoreErrorKind) -> StoreError {
    StoreError::new(kind, "injected failure")
}

fn decode_offset(state: Option<&PageState>) -> usize {
    state
        .and_then(|s| <[u8; 8]>::try_from(s.0.as_slice()).ok())
        .map_or(0, |bytes| u64::from_le_bytes(bytes) as usize)
}

impl PagedReader for MemoryStore {
    fn read_left_page(
        &self,
        table: &str,
        start_token: i64,
        end_token: i64,
        limit: usize,
    ) -> StoreResult<LeftPage> {
        let inner = self.lock();
        let mem = inner.tables.get(table).ok_or_else(|| missing("table", table))?;
        let mut page = LeftPage::default();
        if start_token > end_token {
            return Ok(page);
        }
        for ((token, rowid), values) in mem
            .rows
            .range((start_token, i64::MIN)..=(end_token, i64::MAX))
            .take(limit)
        {
            page.last_token = *token;
            page.rows.push(DataRow {
                rowid: *rowid,
                values: values.clone(),
            });
        }
        Ok(page)
    }

    fn read_index_page(
        &self,
        index: &str,
        keys: &[String],
        limit: usize,
        state: Option<&PageState>,
    ) -> StoreResult<IndexPage> {
        let inner = self.lock();
        let idx = inner.indexes.get(index).ok_or_else(|| missing("index", index))?;
        let offset = decode_offset(state);
        let mut matching = keys.iter().flat_map(|key| {
            idx.entries.get(key).into_iter().flat_map(move |rowids| {
                rowids.iter().map(move |rowid| IndexEntry {
                    key: key.clone(),
                    rowid: *rowid,
                })
            })
        });
        let entries: Vec<IndexEntry> = matching.by_ref().skip(offset).take(limit).collect();
        let next = if matching.next().is_some() {
            Some(PageState(((offset + entries.len()) as u64).to_le_bytes().to_vec()))
        } else {
            None
        };
        Ok(IndexPage { entries, next })
    }

    fn read_data_page(
        &self,
        table: &str,
        rowids: &[i64],
        limit: usize,
    ) -> StoreResult<Vec<DataRow>> {
        let inner = self.lock();
        let mem = inner.tables.get(table).ok_or_else(|| missing("table", table))?;
        Ok(rowids
            .iter()
            .filter_map(|rowid| {
                let token = mem.tokens.get(rowid)?;
                let values = mem.rows.get(&(*token, *rowid))?;
                Some(DataRow {
                    rowid: *rowid,
                    values: values.clone(),
                })
            })
            .take(limit)
            .collect())
    }
}

impl TableWriter for MemoryStore {
    fn insert_data_if_absent(
        &self,
        table: &str,
        rowid: i64,
        record: &TableRecord,
    ) -> StoreResult<InsertOutcome> {
        let mut inner = self.lock();
        if let Some(kind) = inner.faults.data.pop_front() {
            return Err(injected(kind));
        }
        let Inner { tables, faults, .. } = &mut *inner;
        let mem = tables
            .get_mut(table)
            .ok_or_else(|| missing("table", table))?;
        let mut taken = mem.tokens.contains_key(&rowid) || mem.collided.contains(&rowid);
        if !taken && faults.rowid_collisions > 0 {
            faults.rowid_collisions -= 1;
            mem.collided.insert(rowid);
            taken = true;
        }
        if taken {
            return Ok(InsertOutcome::AlreadyExists {
                existing_rowid: rowid,
            });
        }
        let token = token_of(rowid);
        mem.tokens.insert(rowid, token);
        mem.rows.insert((token, rowid), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn insert_index(
        &self,
        index: &str,
        key: &str,
        rowid: i64,
        unique: bool,
    ) -> StoreResult<InsertOutcome> {
        let mut inner = self.lock();
        if let Some(kind) = inner.faults.index.pop_front() {
            return Err(injected(kind));
        }
        let idx = inner
            .indexes
            .get_mut(index)
            .ok_or_else(|| missing("index", index))?;
        let rowids = idx.entries.entry(key.to_string()).or_default();
        if unique {
            if let Some(existing) = rowids.iter().next() {
                return Ok(InsertOutcome::AlreadyExists {
                    existing_rowid: *existing,
                });
            }
        }
        rowids.insert(rowid);
        Ok(InsertOutcome::Inserted)
    }

    fn delete_index_key(&self, index: &str, key: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let idx = inner
            .indexes
            .get_mut(index)
            .ok_or_else(|| missing("index", index))?;
        idx.entries.remove(key);
        Ok(())
    }
}
