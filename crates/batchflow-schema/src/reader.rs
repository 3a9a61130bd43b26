use serde::Deserialize;

use crate::error::{SchemaError, SchemaResult};

pub const DEFAULT_ROWSET_SIZE: usize = 1000;
pub const MAX_ROWSET_SIZE: usize = 100_000;
pub const MAX_EXPECTED_BATCHES: usize = 1_000_000;

#[derive(Clone, Debug, Deserialize)]
pub struct RawTableReaderDef {
    pub table: String,
    #[serde(default)]
    pub expected_batches_total: i64,
    #[serde(default)]
    pub rowset_size: i64,
}

/// Source table of a node and how its token range is split into batches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableReaderDef {
    pub table: String,
    pub expected_batches_total: usize,
    /// Rows per left page.
    pub rowset_size: usize,
}

impl TableReaderDef {
    pub fn from_json(json: &str) -> SchemaResult<Self> {
        let raw: RawTableReaderDef = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawTableReaderDef) -> SchemaResult<Self> {
        let mut errors = Vec::new();
        if raw.table.is_empty() {
            errors.push("table reader cannot reference empty table name".to_string());
        }
        let expected_batches_total = match raw.expected_batches_total {
            0 => 1,
            n => match usize::try_from(n) {
                Ok(n) if n <= MAX_EXPECTED_BATCHES => n,
                _ => {
                    errors.push(format!(
                        "table reader can accept between 1 and {MAX_EXPECTED_BATCHES} batches, {n} specified"
                    ));
                    1
                }
            },
        };
        let rowset_size = match raw.rowset_size {
            0 => DEFAULT_ROWSET_SIZE,
            n => match usize::try_from(n) {
                Ok(n) if n <= MAX_ROWSET_SIZE => n,
                _ => {
                    errors.push(format!(
                        "invalid rowset size {n}, table reader can accept between 0 (defaults to {DEFAULT_ROWSET_SIZE}) and {MAX_ROWSET_SIZE}"
                    ));
                    DEFAULT_ROWSET_SIZE
                }
            },
        };
        if !errors.is_empty() {
            return Err(SchemaError::Multiple(errors));
        }
        Ok(Self {
            table: raw.table,
            expected_batches_total,
            rowset_size,
        })
    }

    /// Inclusive token ranges, one per expected batch, covering the whole `i64` token space.
    pub fn token_intervals(&self) -> Vec<(i64, i64)> {
        token_intervals(self.expected_batches_total)
    }
}

/// Splits `i64::MIN..=i64::MAX` into `batches` contiguous inclusive ranges.
pub fn token_intervals(batches: usize) -> Vec<(i64, i64)> {
    if batches <= 1 {
        return vec![(i64::MIN, i64::MAX)];
    }
    let n = i64::try_from(batches).unwrap_or(i64::MAX);
    let step = i64::MAX / n - i64::MIN / n;
    let mut out = Vec::with_capacity(batches);
    let mut left = i64::MIN;
    for i in 0..batches {
        let right = if i + 1 == batches {
            i64::MAX
        } else {
            left.saturating_add(step - 1)
        };
        out.push((left, right));
        if right == i64::MAX {
            break;
        }
        left = right + 1;
    }
    out
}
