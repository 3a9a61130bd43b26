//! Batch execution for table-creating nodes: storage seams, the concurrent table writer and
//! the per-token-range runners for plain, distinct and lookup-join nodes.
//!
//! Runners read through a [`PagedReader`] and write through a shared [`TableWriter`];
//! [`MemoryStore`] implements both in process.

mod config;
mod error;
mod inserter;
mod memory;
mod runner;
mod stats;
mod store;

pub use config::{ExecConfig, WriterConfig, WRITER_WORKERS_ENV};
pub use error::{ExecError, ExecResult};
pub use inserter::{DataIdxSeqMode, IndexKeys, InsertSummary, TableInserter};
pub use memory::{token_of, MemoryStore};
pub use runner::{
    run_create_distinct_table_for_batch, run_create_table_for_batch,
    run_create_table_rel_for_batch,
};
pub use stats::BatchStats;
pub use store::{
    DataRow, IndexEntry, IndexPage, InsertOutcome, LeftPage, PageState, PagedReader, StoreError,
    StoreErrorKind, StoreResult, TableWriter,
};
