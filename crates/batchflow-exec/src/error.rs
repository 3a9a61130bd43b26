use batchflow_eval::EvalError;
use batchflow_schema::SchemaError;

use crate::store::StoreError;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The node cannot run with the definitions it was given.
    #[error("{0}")]
    Config(String),

    /// A failure tied to one row, with enough context to find it.
    #[error("{context}: [{source}]")]
    Row {
        context: String,
        #[source]
        source: Box<ExecError>,
    },

    /// Independent row failures collected over one page.
    #[error("{}", join_errors(.0))]
    Rows(Vec<ExecError>),

    /// Per-row write failures reported by the writer workers.
    #[error("{}", .0.join("; "))]
    Write(Vec<String>),

    #[error("writer worker {0} panicked")]
    WorkerPanicked(usize),
}

impl ExecError {
    pub(crate) fn row(context: impl Into<String>, source: impl Into<ExecError>) -> Self {
        ExecError::Row {
            context: context.into(),
            source: Box::new(source.into()),
        }
    }
}

fn join_errors(errors: &[ExecError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
