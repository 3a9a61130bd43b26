//! Storage seams used by the batch runners.
//!
//! Readers page through token ranges, index keys and rowid sets; writers expose conditional
//! inserts that report "already exists" as a value rather than an error. Transient failures are
//! classified by [`StoreErrorKind`] so callers can decide how to retry without parsing messages.
use std::collections::HashMap;
use std::fmt;

use batchflow_eval::ScalarValue;
use batchflow_schema::TableRecord;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The table or index is not visible yet, typically right after it was created.
    TableDoesNotExist,
    /// The backend is overloaded.
    OperationTimedOut,
    /// The backend answered without a single successful replica response.
    NoResponses,
    /// The row exceeds the backend's size limit.
    RowTooLarge,
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreErrorKind::TableDoesNotExist => "table does not exist",
            StoreErrorKind::OperationTimedOut => "operation timed out",
            StoreErrorKind::NoResponses => "no responses",
            StoreErrorKind::RowTooLarge => "row too large",
            StoreErrorKind::Other => "storage error",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A stored row: its id plus field values by name.
#[derive(Clone, Debug, PartialEq)]
pub struct DataRow {
    pub rowid: i64,
    pub values: HashMap<String, ScalarValue>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeftPage {
    /// Rows in token order.
    pub rows: Vec<DataRow>,
    /// Token of the last row returned; meaningless when `rows` is empty.
    pub last_token: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: String,
    pub rowid: i64,
}

/// Opaque continuation handed back to the reader to fetch the next index page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageState(pub Vec<u8>);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexPage {
    pub entries: Vec<IndexEntry>,
    /// `None` once every matching entry has been returned.
    pub next: Option<PageState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key was taken. For data rows `existing_rowid` is the requested rowid itself.
    AlreadyExists { existing_rowid: i64 },
}

pub trait PagedReader: Send + Sync {
    /// Up to `limit` rows of `table` whose token lies in `start_token..=end_token`.
    fn read_left_page(
        &self,
        table: &str,
        start_token: i64,
        end_token: i64,
        limit: usize,
    ) -> StoreResult<LeftPage>;

    /// Entries of `index` matching any of `keys`, resumed from `state`.
    fn read_index_page(
        &self,
        index: &str,
        keys: &[String],
        limit: usize,
        state: Option<&PageState>,
    ) -> StoreResult<IndexPage>;

    /// Up to `limit` rows of `table` with the given rowids. Unknown rowids are ignored.
    fn read_data_page(&self, table: &str, rowids: &[i64], limit: usize)
        -> StoreResult<Vec<DataRow>>;
}

pub trait TableWriter: Send + Sync {
    fn insert_data_if_absent(
        &self,
        table: &str,
        rowid: i64,
        record: &TableRecord,
    ) -> StoreResult<InsertOutcome>;

    /// Unique indexes insert conditionally; non-unique ones always insert.
    fn insert_index(
        &self,
        index: &str,
        key: &str,
        rowid: i64,
        unique: bool,
    ) -> StoreResult<InsertOutcome>;

    fn delete_index_key(&self, index: &str, key: &str) -> StoreResult<()>;
}
