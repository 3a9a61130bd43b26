use std::collections::HashMap;

use crate::value::ScalarValue;

/// Variables visible to one evaluation, keyed by table alias and then field name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VarContext {
    tables: HashMap<String, HashMap<String, ScalarValue>>,
}

impl VarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        alias: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<ScalarValue>,
    ) {
        self.tables
            .entry(alias.into())
            .or_default()
            .insert(field.into(), value.into());
    }

    /// Builder form of [`VarContext::insert`].
    pub fn with(
        mut self,
        alias: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<ScalarValue>,
    ) -> Self {
        self.insert(alias, field, value);
        self
    }

    pub fn alias(&self, alias: &str) -> Option<&HashMap<String, ScalarValue>> {
        self.tables.get(alias)
    }

    pub fn get(&self, alias: &str, field: &str) -> Option<&ScalarValue> {
        self.tables.get(alias)?.get(field)
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.tables.contains_key(alias)
    }

    /// Replaces every variable of `alias` with `fields`.
    pub fn set_alias(&mut self, alias: impl Into<String>, fields: HashMap<String, ScalarValue>) {
        self.tables.insert(alias.into(), fields);
    }

    pub fn remove_alias(&mut self, alias: &str) -> Option<HashMap<String, ScalarValue>> {
        self.tables.remove(alias)
    }

    /// Copies every alias of `other` into `self`, overwriting aliases present in both.
    pub fn merge(&mut self, other: &VarContext) {
        for (alias, fields) in &other.tables {
            self.tables.insert(alias.clone(), fields.clone());
        }
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
