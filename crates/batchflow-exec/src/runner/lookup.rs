//! Lookup join: every left page is matched against an index of the lookup table, the
//! matching right rows are fetched by rowid, and output records are either written per
//! matching pair or aggregated per left row.
//!
//! Row failures (key building, filter, field evaluation, having) drop the affected left row's
//! output and are reported together once the page is done.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use batchflow_eval::{AggState, ScalarValue, VarContext};
use batchflow_schema::{
    FieldRef, FieldRefs, JoinType, LookupSpec, NodeKind, Rowset, TableNodeDef, TableRecord,
    LOOKUP_ALIAS,
};

use super::{expect_kind, left_field_refs, left_row_context, row_values, LeftScan};
use crate::config::ExecConfig;
use crate::error::{ExecError, ExecResult};
use crate::inserter::{DataIdxSeqMode, IndexKeys, TableInserter};
use crate::stats::BatchStats;
use crate::store::{PagedReader, TableWriter};

pub fn run_create_table_rel_for_batch(
    reader: &dyn PagedReader,
    writer: Arc<dyn TableWriter>,
    node: &TableNodeDef,
    config: &ExecConfig,
    start_token: i64,
    end_token: i64,
) -> ExecResult<BatchStats> {
    expect_kind(node, NodeKind::LookupTable)?;
    let lookup = node
        .lookup
        .as_ref()
        .ok_or_else(|| ExecError::Config(format!("node {} has no lookup", node.name)))?;
    config.validate()?;
    let started = Instant::now();
    let mut stats = BatchStats::new(&node.reader.table, &node.creator.name);

    let mut left = Rowset::new(left_field_refs(node)?);
    left.init_rows(node.reader.rowset_size);
    let mut right_fields: FieldRefs = std::iter::once(FieldRef::rowid(LOOKUP_ALIAS)).collect();
    right_fields.append_unique(&lookup.right_field_refs(), None);
    let mut right = Rowset::new(right_fields);
    // A full data page always fits in one response.
    let rowid_chunk = config
        .rowid_chunk_size
        .min(lookup.right_lookup_read_batch_size);
    right.init_rows(rowid_chunk);

    let inserter = TableInserter::start(
        writer,
        &node.creator,
        &config.writer,
        DataIdxSeqMode::DataFirst,
    )?;
    let mut scan = LeftScan::new(reader, node, start_token, end_token);

    loop {
        let count = scan.load_next(&mut left)?;
        if count == 0 {
            break;
        }
        let mut page = PageJoin::new(node, lookup, &left, &inserter)?;
        let (keys, key_rows) = page.join_keys();

        for chunk in keys.chunks(config.key_chunk_size) {
            let rowid_keys = read_index_chunk(reader, lookup, chunk)?;
            let mut pending: BTreeSet<i64> = rowid_keys.keys().copied().collect();
            while !pending.is_empty() {
                let ids: Vec<i64> = pending.iter().take(rowid_chunk).copied().collect();
                let mut rows =
                    reader.read_data_page(&lookup.right_table.name, &ids, rowid_chunk)?;
                for id in &ids {
                    pending.remove(id);
                }
                if rows.len() < ids.len() {
                    log::debug!(
                        "{} rowids listed in {} were not found in {}",
                        ids.len() - rows.len(),
                        lookup.index_name,
                        lookup.right_table.name
                    );
                }
                rows.sort_by_key(|r| r.rowid);
                right.reset();
                for row in rows {
                    let values = row_values(right.fields(), row);
                    right.append_row(values)?;
                }
                for right_row in 0..right.row_count() {
                    let right_rowid = right.rowid(right_row)?;
                    let Some(left_rows) = rowid_keys
                        .get(&right_rowid)
                        .and_then(|key| key_rows.get(key))
                    else {
                        continue;
                    };
                    let mut right_vars = VarContext::new();
                    right.export_to_vars(right_row, &mut right_vars, None)?;
                    match lookup.check_filter(&right_vars) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            let err =
                                ExecError::row(format!("lookup row with rowid {right_rowid}"), e);
                            page.fail_rows(left_rows, err);
                            continue;
                        }
                    }
                    for &left_row in left_rows {
                        page.join(left_row, &right_vars, right_rowid)?;
                    }
                }
            }
        }

        stats.rows_read += count;
        page.finish()?;
    }

    let summary = inserter.finish()?;
    stats.rows_written = summary.written;
    stats.elapsed = started.elapsed();
    log::debug!("{} node {} done: {stats}", node.kind, node.name);
    Ok(stats)
}

/// Right rowids found in the index for `keys`, each with the key that matched it.
fn read_index_chunk(
    reader: &dyn PagedReader,
    lookup: &LookupSpec,
    keys: &[String],
) -> ExecResult<BTreeMap<i64, String>> {
    let mut found = BTreeMap::new();
    let mut state = None;
    loop {
        let page = reader.read_index_page(
            &lookup.index_name,
            keys,
            lookup.idx_read_batch_size,
            state.as_ref(),
        )?;
        for entry in page.entries {
            found.insert(entry.rowid, entry.key);
        }
        match page.next {
            Some(next) => state = Some(next),
            None => break,
        }
    }
    Ok(found)
}

/// Per-field aggregation state of one left row.
struct GroupState {
    states: Vec<Option<AggState>>,
    /// Latest value of each field.
    values: Vec<Option<ScalarValue>>,
}

/// Join state of one left page.
struct PageJoin<'a> {
    node: &'a TableNodeDef,
    lookup: &'a LookupSpec,
    left: &'a Rowset,
    inserter: &'a TableInserter,
    /// Left row variables, exported once per page.
    left_vars: Vec<VarContext>,
    matched: Vec<bool>,
    /// Left rows whose output is dropped because of an error.
    failed: Vec<bool>,
    errors: Vec<ExecError>,
    /// One entry per left row when grouping, empty otherwise.
    groups: Vec<GroupState>,
}

impl<'a> PageJoin<'a> {
    fn new(
        node: &'a TableNodeDef,
        lookup: &'a LookupSpec,
        left: &'a Rowset,
        inserter: &'a TableInserter,
    ) -> ExecResult<Self> {
        let row_count = left.row_count();
        let mut left_vars = Vec::with_capacity(row_count);
        for row in 0..row_count {
            let mut vars = VarContext::new();
            left.export_to_vars(row, &mut vars, None)?;
            left_vars.push(vars);
        }
        let mut groups = Vec::new();
        if lookup.group {
            groups.reserve(row_count);
            for _ in 0..row_count {
                let states = node
                    .creator
                    .fields
                    .iter()
                    .map(|field| AggState::for_expr(&field.expression))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push(GroupState {
                    states,
                    values: vec![None; node.creator.fields.len()],
                });
            }
        }
        Ok(Self {
            node,
            lookup,
            left,
            inserter,
            left_vars,
            matched: vec![false; row_count],
            failed: vec![false; row_count],
            errors: Vec::new(),
            groups,
        })
    }

    /// Distinct join keys of the page in first-seen order, and the left rows behind each key.
    fn join_keys(&mut self) -> (Vec<String>, HashMap<String, Vec<usize>>) {
        let mut keys = Vec::new();
        let mut key_rows: HashMap<String, Vec<usize>> = HashMap::new();
        for row in 0..self.left.row_count() {
            let key = match self.lookup.join_key(self.left, row) {
                Ok(key) => key,
                Err(e) => {
                    let err = ExecError::row(left_row_context(self.left, row), e);
                    self.fail_rows(&[row], err);
                    continue;
                }
            };
            let rows = key_rows.entry(key).or_insert_with_key(|key| {
                keys.push(key.clone());
                Vec::new()
            });
            rows.push(row);
        }
        (keys, key_rows)
    }

    /// Records `err` once and drops the output of every row in `left_rows`.
    fn fail_rows(&mut self, left_rows: &[usize], err: ExecError) {
        for &row in left_rows {
            self.failed[row] = true;
        }
        self.errors.push(err);
    }

    /// Joins one left row with one right row that passed the filter.
    fn join(&mut self, left_row: usize, right_vars: &VarContext, right_rowid: i64) -> ExecResult<()> {
        if self.failed[left_row] {
            return Ok(());
        }
        self.matched[left_row] = true;
        match self.joined_record(left_row, right_vars, right_rowid) {
            Ok(Some(record)) => self.emit(left_row, record),
            Ok(None) => Ok(()),
            Err(err) => {
                self.fail_rows(&[left_row], err);
                Ok(())
            }
        }
    }

    /// Feeds the pair into the left row's aggregates when grouping, otherwise computes the
    /// output record of the pair.
    fn joined_record(
        &mut self,
        left_row: usize,
        right_vars: &VarContext,
        right_rowid: i64,
    ) -> ExecResult<Option<TableRecord>> {
        let left = self.left;
        let context = || {
            format!(
                "{}, lookup rowid {right_rowid}",
                left_row_context(left, left_row)
            )
        };
        let mut vars = self.left_vars[left_row].clone();
        vars.merge(right_vars);

        if let Some(group) = self.groups.get_mut(left_row) {
            for (idx, field) in self.node.creator.fields.iter().enumerate() {
                let value = field
                    .calculate(&vars, group.states[idx].as_mut())
                    .map_err(|e| ExecError::row(context(), e))?;
                group.values[idx] = Some(value);
            }
            return Ok(None);
        }

        let record = self
            .node
            .creator
            .calculate_record(&vars)
            .map_err(|e| ExecError::row(context(), e))?;
        Ok(Some(record))
    }

    /// Emits grouped records and unmatched left rows, then reports the page's row failures.
    fn finish(mut self) -> ExecResult<()> {
        let grouped = self.lookup.group;
        for left_row in 0..self.matched.len() {
            if self.failed[left_row] {
                continue;
            }
            let matched = self.matched[left_row];
            let record = match (grouped, matched, self.lookup.join_type) {
                (true, true, _) => self.grouped_record(left_row),
                (_, false, JoinType::Left) => self.unmatched_record(left_row),
                (false, true, _) | (_, false, JoinType::Inner) => continue,
            };
            match record {
                Ok(record) => self.emit(left_row, record)?,
                Err(err) => self.fail_rows(&[left_row], err),
            }
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            log::debug!(
                "{} rows of a {} page failed in node {}",
                self.failed.iter().filter(|f| **f).count(),
                self.left.row_count(),
                self.node.name
            );
            Err(ExecError::Rows(self.errors))
        }
    }

    fn grouped_record(&mut self, left_row: usize) -> ExecResult<TableRecord> {
        let mut record = TableRecord::with_capacity(self.node.creator.fields.len());
        let Some(group) = self.groups.get_mut(left_row) else {
            return Ok(record);
        };
        for (field, value) in self.node.creator.fields.iter().zip(group.values.iter_mut()) {
            let value = match value.take() {
                Some(value) => value,
                None => field.default_value()?,
            };
            record.insert(field.name.clone(), value);
        }
        Ok(record)
    }

    /// Left join output for a left row without lookup matches. Aggregates (grouped) or fields
    /// reading the lookup table (non-grouped) take their defaults, the rest is computed from
    /// the left row.
    fn unmatched_record(&self, left_row: usize) -> ExecResult<TableRecord> {
        let vars = &self.left_vars[left_row];
        let mut record = TableRecord::with_capacity(self.node.creator.fields.len());
        for field in &self.node.creator.fields {
            let use_default = if self.lookup.group {
                field.root_agg.is_some()
            } else {
                field.uses_alias(LOOKUP_ALIAS)
            };
            let value = if use_default {
                field.default_value()?
            } else {
                field
                    .calculate(vars, None)
                    .map_err(|e| ExecError::row(left_row_context(self.left, left_row), e))?
            };
            record.insert(field.name.clone(), value);
        }
        Ok(record)
    }

    /// Writes `record` if it passes the having check. Having and key failures are row
    /// failures; a closed writer is not.
    fn emit(&mut self, left_row: usize, record: TableRecord) -> ExecResult<()> {
        let keys = match self.prepare(left_row, &record) {
            Ok(Some(keys)) => keys,
            Ok(None) => return Ok(()),
            Err(err) => {
                self.fail_rows(&[left_row], err);
                return Ok(());
            }
        };
        self.inserter.add(record, keys)
    }

    fn prepare(&self, left_row: usize, record: &TableRecord) -> ExecResult<Option<IndexKeys>> {
        let context = || left_row_context(self.left, left_row);
        let passes = self
            .node
            .creator
            .check_having(record)
            .map_err(|e| ExecError::row(context(), e))?;
        if !passes {
            return Ok(None);
        }
        let keys = self
            .inserter
            .build_index_keys(record)
            .map_err(|e| ExecError::row(context(), e))?;
        Ok(Some(keys))
    }
}
