//! Table, index and lookup definitions for batch pipelines, plus the key encoder and the
//! in-memory [`Rowset`] pages that flow between readers and writers.
//!
//! Definitions are deserialized from raw serde structs and validated once; after that they are
//! immutable and shared by every batch of a run.

mod error;
mod field_ref;
mod index;
mod key;
mod lookup;
mod node;
mod reader;
mod rowset;
mod table_creator;

pub use error::{SchemaError, SchemaResult};
pub use field_ref::{
    FieldRef, FieldRefs, CREATOR_ALIAS, LOOKUP_ALIAS, PROCESSOR_ALIAS, READER_ALIAS, ROWID_FIELD,
};
pub use index::{
    parse_index_map, CaseSensitivity, IdxComponent, IdxDef, IdxDefMap, SortOrder, Uniqueness,
    DEFAULT_STRING_COMPONENT_LEN, MAX_STRING_COMPONENT_LEN, MIN_STRING_COMPONENT_LEN,
};
pub use key::{build_key, component_width, encode_component};
pub use lookup::{
    JoinType, LookupSpec, RawLookupSpec, DEFAULT_IDX_READ_BATCH_SIZE,
    DEFAULT_RIGHT_LOOKUP_READ_BATCH_SIZE, MAX_IDX_READ_BATCH_SIZE,
    MAX_RIGHT_LOOKUP_READ_BATCH_SIZE,
};
pub use node::{check_expression_type, NodeKind, TableNodeDef};
pub use reader::{
    token_intervals, RawTableReaderDef, TableReaderDef, DEFAULT_ROWSET_SIZE,
    MAX_EXPECTED_BATCHES, MAX_ROWSET_SIZE,
};
pub use rowset::Rowset;
pub use table_creator::{
    check_value_type, FieldDef, RawFieldDef, RawTableCreatorDef, TableCreatorDef, TableRecord,
    CONSTANT_PACKAGES, DEFAULT_DATETIME_LAYOUT, MAX_TABLE_NAME_LEN,
};
