use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use batchflow_eval::VarContext;
use batchflow_schema::{NodeKind, Rowset, TableNodeDef};

use super::{expect_kind, left_field_refs, left_row_context, LeftScan};
use crate::config::ExecConfig;
use crate::error::{ExecError, ExecResult};
use crate::inserter::{DataIdxSeqMode, TableInserter};
use crate::stats::BatchStats;
use crate::store::{PagedReader, TableWriter};

/// Computes one output record per source row in `start_token..=end_token` and writes the
/// records that pass the having condition.
pub fn run_create_table_for_batch(
    reader: &dyn PagedReader,
    writer: Arc<dyn TableWriter>,
    node: &TableNodeDef,
    config: &ExecConfig,
    start_token: i64,
    end_token: i64,
) -> ExecResult<BatchStats> {
    expect_kind(node, NodeKind::Table)?;
    run_row_by_row(reader, writer, node, config, start_token, end_token, DataIdxSeqMode::DataFirst)
}

/// Like [`run_create_table_for_batch`], but writes each unique key once. Keys already sent
/// within a page are skipped before they reach the writer.
pub fn run_create_distinct_table_for_batch(
    reader: &dyn PagedReader,
    writer: Arc<dyn TableWriter>,
    node: &TableNodeDef,
    config: &ExecConfig,
    start_token: i64,
    end_token: i64,
) -> ExecResult<BatchStats> {
    expect_kind(node, NodeKind::DistinctTable)?;
    run_row_by_row(
        reader,
        writer,
        node,
        config,
        start_token,
        end_token,
        DataIdxSeqMode::DistinctIdxFirst,
    )
}

fn run_row_by_row(
    reader: &dyn PagedReader,
    writer: Arc<dyn TableWriter>,
    node: &TableNodeDef,
    config: &ExecConfig,
    start_token: i64,
    end_token: i64,
    mode: DataIdxSeqMode,
) -> ExecResult<BatchStats> {
    config.validate()?;
    let started = Instant::now();
    let mut stats = BatchStats::new(&node.reader.table, &node.creator.name);

    let distinct_index = match mode {
        DataIdxSeqMode::DataFirst => None,
        DataIdxSeqMode::DistinctIdxFirst => Some(node.creator.single_unique_index()?.0),
    };

    let mut left = Rowset::new(left_field_refs(node)?);
    left.init_rows(node.reader.rowset_size);
    let inserter = TableInserter::start(writer, &node.creator, &config.writer, mode)?;
    let mut scan = LeftScan::new(reader, node, start_token, end_token);

    loop {
        let count = scan.load_next(&mut left)?;
        if count == 0 {
            break;
        }
        let mut sent_keys: HashSet<String> = HashSet::new();
        let mut cache_hits = 0usize;
        for row in 0..count {
            let mut vars = VarContext::new();
            left.export_to_vars(row, &mut vars, None)?;
            let record = node
                .creator
                .calculate_record(&vars)
                .map_err(|e| ExecError::row(left_row_context(&left, row), e))?;
            let passes = node
                .creator
                .check_having(&record)
                .map_err(|e| ExecError::row(left_row_context(&left, row), e))?;
            if !passes {
                continue;
            }
            let keys = inserter.build_index_keys(&record)?;
            if let Some(unique) = distinct_index {
                if let Some(key) = keys.get(unique) {
                    if !sent_keys.insert(key.clone()) {
                        cache_hits += 1;
                        continue;
                    }
                }
            }
            inserter.add(record, keys)?;
        }
        if distinct_index.is_some() {
            log::debug!(
                "{}: distinct cache hits {cache_hits}/{count}",
                node.creator.name
            );
        }
        stats.rows_read += count;
    }

    let summary = inserter.finish()?;
    stats.rows_written = summary.written;
    stats.elapsed = started.elapsed();
    log::debug!("{} node {} done: {stats}", node.kind, node.name);
    Ok(stats)
}
