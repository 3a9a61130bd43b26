//! Concurrent writer for one output table.
//!
//! Records go through a bounded queue to a fixed set of worker threads. Each worker picks a
//! random rowid, inserts the data row conditionally and then maintains every index of the
//! table. Transient storage errors are retried with pauses, rowid collisions with a fresh id.
//! Outcomes are tallied while records are queued; the first failures are kept and reported
//! once by [`TableInserter::finish`].
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use batchflow_schema::{build_key, IdxDef, TableCreatorDef, TableRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::WriterConfig;
use crate::error::{ExecError, ExecResult};
use crate::store::{InsertOutcome, StoreErrorKind, StoreResult, TableWriter};

/// Index name to encoded key for one record.
pub type IndexKeys = BTreeMap<String, String>;

/// Order in which a record's data row and its unique index entry are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataIdxSeqMode {
    /// Data row first, then every index.
    DataFirst,
    /// The single unique index first; an existing key means the record is already stored.
    DistinctIdxFirst,
}

/// Rows handled by an inserter, reported when it finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub written: usize,
    /// Distinct records whose key was already present.
    pub skipped: usize,
}

struct WriteItem {
    record: TableRecord,
    keys: IndexKeys,
}

enum RowOutcome {
    Written,
    Skipped,
    Failed(String),
}

/// Running totals of worker outcomes, holding at most `max_errors` messages.
#[derive(Debug, Default)]
struct Tally {
    summary: InsertSummary,
    errors: Vec<String>,
    suppressed: usize,
}

impl Tally {
    fn record(&mut self, outcome: RowOutcome, max_errors: usize) {
        match outcome {
            RowOutcome::Written => self.summary.written += 1,
            RowOutcome::Skipped => self.summary.skipped += 1,
            RowOutcome::Failed(msg) if self.errors.len() < max_errors => self.errors.push(msg),
            RowOutcome::Failed(_) => self.suppressed += 1,
        }
    }

    fn into_result(mut self) -> ExecResult<InsertSummary> {
        if self.suppressed > 0 {
            self.errors.push(format!(
                "too many errors in TableInserter, {} more not shown",
                self.suppressed
            ));
        }
        if self.errors.is_empty() {
            Ok(self.summary)
        } else {
            Err(ExecError::Write(self.errors))
        }
    }
}

struct IndexTarget {
    name: String,
    def: IdxDef,
}

struct WriterShared {
    table: String,
    indexes: Vec<IndexTarget>,
    /// Set in distinct mode.
    distinct_index: Option<String>,
    config: WriterConfig,
    store: Arc<dyn TableWriter>,
}

pub struct TableInserter {
    shared: Arc<WriterShared>,
    sender: Option<SyncSender<WriteItem>>,
    results: Receiver<RowOutcome>,
    tally: RefCell<Tally>,
    workers: Vec<JoinHandle<()>>,
}

impl TableInserter {
    pub fn start(
        store: Arc<dyn TableWriter>,
        table: &TableCreatorDef,
        config: &WriterConfig,
        mode: DataIdxSeqMode,
    ) -> ExecResult<Self> {
        config.validate()?;
        let distinct_index = match mode {
            DataIdxSeqMode::DataFirst => None,
            DataIdxSeqMode::DistinctIdxFirst => {
                Some(table.single_unique_index()?.0.to_string())
            }
        };
        let shared = Arc::new(WriterShared {
            table: table.name.clone(),
            indexes: table
                .indexes
                .iter()
                .map(|(name, def)| IndexTarget {
                    name: name.clone(),
                    def: def.clone(),
                })
                .collect(),
            distinct_index,
            config: config.clone(),
            store,
        });

        let (sender, receiver) = mpsc::sync_channel::<WriteItem>(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let (results_tx, results) = mpsc::channel();
        let worker_count = config.effective_workers();
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let shared = Arc::clone(&shared);
            let receiver = Arc::clone(&receiver);
            let results_tx = results_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("batchflow-writer-{id}"))
                .spawn(move || worker_loop(id, &shared, &receiver, &results_tx))
                .map_err(|e| ExecError::Config(format!("cannot spawn writer worker {id}: {e}")))?;
            workers.push(handle);
        }
        log::debug!(
            "started {worker_count} writer workers for table {}",
            shared.table
        );

        Ok(Self {
            shared,
            sender: Some(sender),
            results,
            tally: RefCell::default(),
            workers,
        })
    }

    /// Encodes every index key of `record`.
    pub fn build_index_keys(&self, record: &TableRecord) -> ExecResult<IndexKeys> {
        self.shared
            .indexes
            .iter()
            .map(|idx| -> ExecResult<(String, String)> {
                Ok((idx.name.clone(), build_key(record, &idx.def)?))
            })
            .collect()
    }

    /// Queues a record, blocking while the queue is full, then tallies finished rows.
    pub fn add(&self, record: TableRecord, keys: IndexKeys) -> ExecResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ExecError::Config("inserter already closed".into()))?;
        sender.send(WriteItem { record, keys }).map_err(|_| {
            ExecError::Config(format!(
                "writer workers for table {} are gone",
                self.shared.table
            ))
        })?;
        self.drain_results();
        Ok(())
    }

    /// Folds every outcome reported so far into the tally.
    fn drain_results(&self) {
        let max_errors = self.shared.config.max_reported_errors;
        let mut tally = self.tally.borrow_mut();
        for outcome in self.results.try_iter() {
            tally.record(outcome, max_errors);
        }
    }

    /// Closes the queue, waits for every worker and reports what was written.
    pub fn finish(mut self) -> ExecResult<InsertSummary> {
        let panicked = self.shutdown();
        if let Some(id) = panicked.first() {
            return Err(ExecError::WorkerPanicked(*id));
        }

        self.drain_results();
        self.tally.take().into_result()
    }

    /// Drops the queue and joins the workers, returning the ids of those that panicked.
    fn shutdown(&mut self) -> Vec<usize> {
        self.sender.take();
        let mut panicked = Vec::new();
        for (id, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                panicked.push(id);
            }
        }
        panicked
    }
}

impl Drop for TableInserter {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop(
    id: usize,
    shared: &WriterShared,
    receiver: &Mutex<Receiver<WriteItem>>,
    results: &Sender<RowOutcome>,
) {
    let mut rng = new_rng();
    let mut handled = 0usize;
    loop {
        let item = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(item) = item else {
            break;
        };
        let outcome = match shared.write(&mut rng, &item) {
            Ok(outcome) => outcome,
            Err(msg) => {
                log::error!("table {}: abandoning row: {msg}", shared.table);
                RowOutcome::Failed(msg)
            }
        };
        handled += 1;
        if results.send(outcome).is_err() {
            break;
        }
    }
    log::debug!(
        "writer worker {id} for table {} done after {handled} rows",
        shared.table
    );
}

static RNG_SEQ: AtomicU64 = AtomicU64::new(0);

fn machine_hash() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::env::var("HOSTNAME").unwrap_or_default().hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish()
}

fn new_rng() -> StdRng {
    let seq = RNG_SEQ.fetch_add(1, Ordering::Relaxed);
    StdRng::seed_from_u64(machine_hash() ^ seq.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

/// Non-negative 63-bit rowid.
fn new_rowid(rng: &mut StdRng) -> i64 {
    (rng.gen::<u64>() >> 1) as i64
}

impl WriterShared {
    fn write(&self, rng: &mut StdRng, item: &WriteItem) -> Result<RowOutcome, String> {
        match &self.distinct_index {
            None => self.write_data_first(rng, item),
            Some(unique) => self.write_distinct(rng, item, unique),
        }
    }

    fn write_data_first(&self, rng: &mut StdRng, item: &WriteItem) -> Result<RowOutcome, String> {
        for _ in 0..self.config.max_duplicate_retries {
            let rowid = new_rowid(rng);
            match self.insert_data(rowid, &item.record)? {
                InsertOutcome::Inserted => {
                    self.insert_indexes(item, rowid, None)?;
                    return Ok(RowOutcome::Written);
                }
                InsertOutcome::AlreadyExists { .. } => {
                    log::warn!("table {}: rowid {rowid} taken, retrying", self.table);
                    *rng = new_rng();
                }
            }
        }
        Err(self.collision_error())
    }

    fn write_distinct(
        &self,
        rng: &mut StdRng,
        item: &WriteItem,
        unique: &str,
    ) -> Result<RowOutcome, String> {
        let key = item
            .keys
            .get(unique)
            .ok_or_else(|| format!("no key computed for index {unique}"))?;
        for _ in 0..self.config.max_duplicate_retries {
            let rowid = new_rowid(rng);
            if let InsertOutcome::AlreadyExists { .. } = self.insert_unique_index(unique, key, rowid)?
            {
                return Ok(RowOutcome::Skipped);
            }
            match self.insert_data(rowid, &item.record)? {
                InsertOutcome::Inserted => {
                    self.insert_indexes(item, rowid, Some(unique))?;
                    return Ok(RowOutcome::Written);
                }
                InsertOutcome::AlreadyExists { .. } => {
                    log::warn!(
                        "table {}: rowid {rowid} taken, releasing key in {unique} and retrying",
                        self.table
                    );
                    self.with_retries(&format!("cannot delete key from {unique}"), |_| {
                        self.store.delete_index_key(unique, key)
                    })?;
                    *rng = new_rng();
                }
            }
        }
        Err(self.collision_error())
    }

    fn collision_error(&self) -> String {
        format!(
            "cannot insert record into table {} after {} attempts: rowid collisions",
            self.table, self.config.max_duplicate_retries
        )
    }

    fn insert_data(&self, rowid: i64, record: &TableRecord) -> Result<InsertOutcome, String> {
        self.with_retries(&format!("cannot write to table {}", self.table), |_| {
            self.store.insert_data_if_absent(&self.table, rowid, record)
        })
    }

    /// Writes every index entry except `skip`.
    fn insert_indexes(&self, item: &WriteItem, rowid: i64, skip: Option<&str>) -> Result<(), String> {
        for idx in &self.indexes {
            if skip == Some(idx.name.as_str()) {
                continue;
            }
            let key = item
                .keys
                .get(&idx.name)
                .ok_or_else(|| format!("no key computed for index {}", idx.name))?;
            if idx.def.is_unique() {
                if let InsertOutcome::AlreadyExists { existing_rowid } =
                    self.insert_unique_index(&idx.name, key, rowid)?
                {
                    return Err(format!(
                        "duplicate key error: cannot insert key {key} into unique index {}, it already points to rowid {existing_rowid}, attempted rowid {rowid}",
                        idx.name
                    ));
                }
            } else {
                self.with_retries(&format!("cannot write to index {}", idx.name), |_| {
                    self.store.insert_index(&idx.name, key, rowid, false)
                })?;
            }
        }
        Ok(())
    }

    /// Conditional unique insert. Finding our own rowid on a retry means an earlier
    /// attempt went through.
    fn insert_unique_index(&self, index: &str, key: &str, rowid: i64) -> Result<InsertOutcome, String> {
        self.with_retries(&format!("cannot write to index {index}"), |attempt| {
            match self.store.insert_index(index, key, rowid, true)? {
                InsertOutcome::AlreadyExists { existing_rowid }
                    if existing_rowid == rowid && attempt > 0 =>
                {
                    log::warn!(
                        "index {index}: key {key} already points to rowid {rowid} after a retry, assuming the earlier attempt succeeded"
                    );
                    Ok(InsertOutcome::Inserted)
                }
                outcome => Ok(outcome),
            }
        })
    }

    /// Runs `op` until it succeeds, pausing on transient errors. `op` gets the attempt number.
    fn with_retries<T>(
        &self,
        context: &str,
        mut op: impl FnMut(usize) -> StoreResult<T>,
    ) -> Result<T, String> {
        let max = self.config.max_db_problem_retries;
        let mut attempt = 0;
        loop {
            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let pause = match err.kind {
                StoreErrorKind::TableDoesNotExist => self.config.does_not_exist_pause(),
                StoreErrorKind::OperationTimedOut | StoreErrorKind::NoResponses => {
                    self.config.operation_timed_out_pause(attempt)
                }
                StoreErrorKind::RowTooLarge | StoreErrorKind::Other => {
                    return Err(format!("{context}: {err}"));
                }
            };
            attempt += 1;
            if attempt >= max {
                return Err(format!("{context}: giving up after {attempt} attempts: {err}"));
            }
            log::warn!("{context}: {err}, retry {attempt} in {}ms", pause.as_millis());
            thread::sleep(pause);
        }
    }
}
