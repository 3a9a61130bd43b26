//! Batch runners: each reads one token range of a node's source table and writes the node's
//! output table.
mod lookup;
mod table;

pub use lookup::run_create_table_rel_for_batch;
pub use table::{run_create_distinct_table_for_batch, run_create_table_for_batch};

use batchflow_eval::ScalarValue;
use batchflow_schema::{
    FieldRef, FieldRefs, NodeKind, Rowset, TableNodeDef, CONSTANT_PACKAGES, READER_ALIAS,
    ROWID_FIELD,
};

use crate::error::{ExecError, ExecResult};
use crate::store::{DataRow, PagedReader};

fn expect_kind(node: &TableNodeDef, kind: NodeKind) -> ExecResult<()> {
    if node.kind != kind {
        return Err(ExecError::Config(format!(
            "node {} is a {} node, expected {kind}",
            node.name, node.kind
        )));
    }
    Ok(())
}

/// Columns a left page must carry: rowid, every reader field the output reads and the
/// join-on fields.
fn left_field_refs(node: &TableNodeDef) -> ExecResult<FieldRefs> {
    let mut fields: FieldRefs = std::iter::once(FieldRef::rowid(READER_ALIAS)).collect();
    let used = FieldRefs::resolve(
        &node.creator.used_in_target_expressions(),
        &node.src_field_refs(),
        &CONSTANT_PACKAGES,
    )?;
    fields.append_unique(&used, Some(READER_ALIAS));
    if let Some(lookup) = &node.lookup {
        fields.append_unique(&lookup.left_fields, None);
    }
    Ok(fields)
}

/// Row values in `fields` order. Missing columns take their type's zero value.
fn row_values(fields: &FieldRefs, row: DataRow) -> Vec<ScalarValue> {
    let DataRow { rowid, mut values } = row;
    fields
        .iter()
        .map(|field| {
            if field.field_name == ROWID_FIELD {
                ScalarValue::Int(rowid)
            } else {
                values
                    .remove(&field.field_name)
                    .unwrap_or_else(|| field.field_type.zero_value())
            }
        })
        .collect()
}

/// Walks a token range page by page.
struct LeftScan<'a> {
    reader: &'a dyn PagedReader,
    table: &'a str,
    next_token: Option<i64>,
    end_token: i64,
    page_size: usize,
}

impl<'a> LeftScan<'a> {
    fn new(reader: &'a dyn PagedReader, node: &'a TableNodeDef, start: i64, end: i64) -> Self {
        Self {
            reader,
            table: &node.reader.table,
            next_token: Some(start),
            end_token: end,
            page_size: node.reader.rowset_size,
        }
    }

    /// Replaces the contents of `rowset` with the next page and returns its row count.
    /// Zero means the range is exhausted.
    fn load_next(&mut self, rowset: &mut Rowset) -> ExecResult<usize> {
        rowset.reset();
        let Some(start) = self.next_token else {
            return Ok(0);
        };
        let page = self
            .reader
            .read_left_page(self.table, start, self.end_token, self.page_size)?;
        let count = page.rows.len();
        self.next_token = if count < self.page_size {
            None
        } else {
            page.last_token.checked_add(1)
        };
        for row in page.rows {
            let values = row_values(rowset.fields(), row);
            rowset.append_row(values)?;
        }
        log::debug!(
            "read {count} rows from {} starting at token {start}",
            self.table
        );
        Ok(count)
    }
}

/// Describes a left row for error messages.
fn left_row_context(rowset: &Rowset, row: usize) -> String {
    match rowset.rowid(row) {
        Ok(rowid) => format!("left row with rowid {rowid}"),
        Err(_) => format!("left row {row}"),
    }
}
