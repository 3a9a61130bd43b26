use batchflow_eval::EvalError;

pub type SchemaResult<T> = Result<T, SchemaError>;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("cannot deserialize definition: {0}")]
    Json(#[from] serde_json::Error),

    /// A definition that is well-formed but semantically unusable. Raised before any row is read.
    #[error("{0}")]
    Config(String),

    #[error("cannot parse index def [{def}]: {message}")]
    IndexDef { def: String, message: String },

    #[error("cannot find value for field {field} in [{available}]")]
    MissingKeyField { field: String, available: String },

    #[error("cannot convert value {value} to type {expected}")]
    KeyValueType { value: String, expected: String },

    #[error("cannot build key, unsupported value {0}")]
    UnsupportedKeyValue(String),

    #[error("rowset is full, capacity {capacity}")]
    RowsetFull { capacity: usize },

    #[error("row {row} out of range, rowset has {row_count} rows")]
    RowOutOfRange { row: usize, row_count: usize },

    #[error("unknown field {0}")]
    UnknownField(String),

    #[error("cannot evaluate expression for field {field}: [{source}]")]
    FieldEval { field: String, source: EvalError },

    #[error("invalid field {field} type: expected type {expected}, but got {value}")]
    FieldType {
        field: String,
        expected: String,
        value: String,
    },

    /// Several independent failures collected while computing one record.
    #[error("{}", .0.join("; "))]
    Multiple(Vec<String>),
}

impl SchemaError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SchemaError::Config(message.into())
    }
}
