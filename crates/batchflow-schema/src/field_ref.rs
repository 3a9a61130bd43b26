use std::fmt;

use batchflow_eval::ValueType;
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};

/// Alias of fields read from the source table.
pub const READER_ALIAS: &str = "r";
/// Alias of fields produced by the table creator, as seen by `having`.
pub const CREATOR_ALIAS: &str = "w";
/// Alias of fields read from the lookup (right) table.
pub const LOOKUP_ALIAS: &str = "l";
/// Alias of fields produced by a custom row processor.
pub const PROCESSOR_ALIAS: &str = "p";

pub const ROWID_FIELD: &str = "rowid";

/// A named, typed column bound to a table alias.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub table_name: String,
    pub field_name: String,
    pub field_type: ValueType,
}

impl FieldRef {
    pub fn new(
        table_name: impl Into<String>,
        field_name: impl Into<String>,
        field_type: ValueType,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            field_name: field_name.into(),
            field_type,
        }
    }

    pub fn rowid(table_name: impl Into<String>) -> Self {
        Self::new(table_name, ROWID_FIELD, ValueType::Int)
    }

    /// `alias.field`, the form used in expressions and as a uniqueness key.
    pub fn alias_hash(&self) -> String {
        format!("{}.{}", self.table_name, self.field_name)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.table_name, self.field_name, self.field_type)
    }
}

/// Ordered collection of [`FieldRef`]s with unique `alias.field` pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldRefs(Vec<FieldRef>);

impl FieldRefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: FieldRef) -> SchemaResult<()> {
        if self.contains(&field.table_name, &field.field_name) {
            return Err(SchemaError::config(format!(
                "duplicate field {}",
                field.alias_hash()
            )));
        }
        self.0.push(field);
        Ok(())
    }

    /// Appends every field of `other` not yet present, optionally only those of `alias`.
    pub fn append_unique(&mut self, other: &FieldRefs, alias: Option<&str>) {
        for field in other.iter() {
            if alias.is_some_and(|a| a != field.table_name) {
                continue;
            }
            if !self.contains(&field.table_name, &field.field_name) {
                self.0.push(field.clone());
            }
        }
    }

    pub fn contains(&self, alias: &str, field: &str) -> bool {
        self.find(alias, field).is_some()
    }

    pub fn find(&self, alias: &str, field: &str) -> Option<&FieldRef> {
        self.0
            .iter()
            .find(|f| f.table_name == alias && f.field_name == field)
    }

    pub fn find_by_field_name(&self, field: &str) -> Option<&FieldRef> {
        self.0.iter().find(|f| f.field_name == field)
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.0.iter().any(|f| f.table_name == alias)
    }

    /// Copy of the collection with every field relabelled to `alias`.
    pub fn with_alias(&self, alias: &str) -> FieldRefs {
        FieldRefs(
            self.0
                .iter()
                .map(|f| FieldRef::new(alias, f.field_name.clone(), f.field_type))
                .collect(),
        )
    }

    /// Fields of `alias` only.
    pub fn filter_alias(&self, alias: &str) -> FieldRefs {
        FieldRefs(
            self.0
                .iter()
                .filter(|f| f.table_name == alias)
                .cloned()
                .collect(),
        )
    }

    /// Resolves `alias.field` pairs harvested from an expression against `known`, reporting
    /// every unknown pair at once. Aliases listed in `ignore` (named constant packages) are
    /// skipped.
    pub fn resolve(
        used: &[(String, String)],
        known: &FieldRefs,
        ignore: &[&str],
    ) -> SchemaResult<FieldRefs> {
        let mut out = FieldRefs::new();
        let mut unknown = Vec::new();
        for (alias, field) in used {
            if ignore.contains(&alias.as_str()) {
                continue;
            }
            match known.find(alias, field) {
                Some(_) if out.contains(alias, field) => {}
                Some(found) => out.0.push(found.clone()),
                None => unknown.push(format!("unknown field {alias}.{field}")),
            }
        }
        if unknown.is_empty() {
            Ok(out)
        } else {
            Err(SchemaError::Multiple(unknown))
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldRef> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&FieldRef> {
        self.0.get(idx)
    }
}

impl FromIterator<FieldRef> for FieldRefs {
    fn from_iter<I: IntoIterator<Item = FieldRef>>(iter: I) -> Self {
        let mut out = FieldRefs::new();
        for field in iter {
            if !out.contains(&field.table_name, &field.field_name) {
                out.0.push(field);
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a FieldRefs {
    type Item = &'a FieldRef;
    type IntoIter = std::slice::Iter<'a, FieldRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
