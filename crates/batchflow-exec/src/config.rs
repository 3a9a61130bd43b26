use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecError, ExecResult};

/// Overrides [`WriterConfig::workers`] when set to a positive integer.
pub const WRITER_WORKERS_ENV: &str = "BATCHFLOW_WRITER_WORKERS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Writer threads per inserter (default: 5).
    pub workers: usize,
    /// Records buffered between the producer and the workers (default: 100).
    pub queue_capacity: usize,
    /// Pause before retrying a write to a table that is not visible yet (default: 2000ms).
    pub does_not_exist_pause_ms: u64,
    /// First pause before retrying an overloaded backend (default: 200ms).
    pub operation_timed_out_pause_ms: u64,
    /// Growth factor of the overload pause per attempt (default: 2).
    pub backoff_multiplier: u32,
    /// Attempts per storage operation on transient errors (default: 5).
    pub max_db_problem_retries: usize,
    /// Rowids tried per record before giving up on collisions (default: 5).
    pub max_duplicate_retries: usize,
    /// Row errors kept before the rest collapse into one message (default: 5).
    pub max_reported_errors: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 100,
            does_not_exist_pause_ms: 2000,
            operation_timed_out_pause_ms: 200,
            backoff_multiplier: 2,
            max_db_problem_retries: 5,
            max_duplicate_retries: 5,
            max_reported_errors: 5,
        }
    }
}

impl WriterConfig {
    /// Worker count after the environment override.
    pub fn effective_workers(&self) -> usize {
        std::env::var(WRITER_WORKERS_ENV)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(self.workers)
    }

    pub fn does_not_exist_pause(&self) -> Duration {
        Duration::from_millis(self.does_not_exist_pause_ms)
    }

    /// Pause before retry number `attempt` (0-based) of an overloaded operation.
    pub fn operation_timed_out_pause(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt).unwrap_or(u32::MAX);
        let factor = u64::from(self.backoff_multiplier).saturating_pow(exp);
        Duration::from_millis(self.operation_timed_out_pause_ms.saturating_mul(factor))
    }

    pub fn validate(&self) -> ExecResult<()> {
        if self.workers == 0 {
            return Err(ExecError::Config("writer needs at least one worker".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ExecError::Config("writer queue capacity must be positive".into()));
        }
        if self.max_db_problem_retries == 0 || self.max_duplicate_retries == 0 {
            return Err(ExecError::Config("writer retry limits must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub writer: WriterConfig,
    /// Join keys per index lookup request (default: 100).
    pub key_chunk_size: usize,
    /// Rowids per right data request (default: 100).
    pub rowid_chunk_size: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            key_chunk_size: 100,
            rowid_chunk_size: 100,
        }
    }
}

impl ExecConfig {
    pub fn validate(&self) -> ExecResult<()> {
        self.writer.validate()?;
        if self.key_chunk_size == 0 || self.rowid_chunk_size == 0 {
            return Err(ExecError::Config("lookup chunk sizes must be positive".into()));
        }
        Ok(())
    }
}
