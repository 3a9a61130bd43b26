use std::collections::HashMap;
use std::fmt;

use batchflow_eval::{eval, parse, Expr, ScalarValue, VarContext};
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::field_ref::{FieldRefs, LOOKUP_ALIAS};
use crate::index::IdxDef;
use crate::key::build_key;
use crate::rowset::Rowset;
use crate::table_creator::{TableCreatorDef, CONSTANT_PACKAGES};

pub const DEFAULT_IDX_READ_BATCH_SIZE: usize = 3000;
pub const MAX_IDX_READ_BATCH_SIZE: usize = 5000;
pub const DEFAULT_RIGHT_LOOKUP_READ_BATCH_SIZE: usize = 3000;
pub const MAX_RIGHT_LOOKUP_READ_BATCH_SIZE: usize = 5000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawLookupSpec {
    pub index_name: String,
    pub join_on: String,
    #[serde(default)]
    pub group: bool,
    #[serde(default)]
    pub filter: String,
    pub join_type: String,
    #[serde(default)]
    pub idx_read_batch_size: i64,
    #[serde(default)]
    pub right_lookup_read_batch_size: i64,
}

/// A validated lookup join against an index of another table.
#[derive(Clone, Debug)]
pub struct LookupSpec {
    pub index_name: String,
    /// Left fields in index component order.
    pub left_fields: FieldRefs,
    pub group: bool,
    pub raw_filter: String,
    pub filter: Option<Expr>,
    pub join_type: JoinType,
    pub idx_read_batch_size: usize,
    pub right_lookup_read_batch_size: usize,
    /// Definition of the table being looked up.
    pub right_table: TableCreatorDef,
    pub index: IdxDef,
}

impl LookupSpec {
    pub fn from_json(
        json: &str,
        src_alias: &str,
        src_fields: &FieldRefs,
        right_table: &TableCreatorDef,
    ) -> SchemaResult<Self> {
        let raw: RawLookupSpec = serde_json::from_str(json)?;
        Self::new(raw, src_alias, src_fields, right_table)
    }

    pub fn new(
        raw: RawLookupSpec,
        src_alias: &str,
        src_fields: &FieldRefs,
        right_table: &TableCreatorDef,
    ) -> SchemaResult<Self> {
        let join_type = match raw.join_type.as_str() {
            "inner" => JoinType::Inner,
            "left" => JoinType::Left,
            other => {
                return Err(SchemaError::config(format!(
                    "invalid join type, expected inner or left, {other} is not supported"
                )))
            }
        };
        let idx_read_batch_size = page_size(
            "idx_read_batch_size",
            raw.idx_read_batch_size,
            DEFAULT_IDX_READ_BATCH_SIZE,
            MAX_IDX_READ_BATCH_SIZE,
        )?;
        let right_lookup_read_batch_size = page_size(
            "right_lookup_read_batch_size",
            raw.right_lookup_read_batch_size,
            DEFAULT_RIGHT_LOOKUP_READ_BATCH_SIZE,
            MAX_RIGHT_LOOKUP_READ_BATCH_SIZE,
        )?;

        let filter = if raw.filter.trim().is_empty() {
            None
        } else {
            let expr = parse(&raw.filter).map_err(|e| {
                SchemaError::config(format!(
                    "cannot parse lookup filter condition [{}]: {e}",
                    raw.filter
                ))
            })?;
            let right_fields = right_table.field_refs_with_alias(LOOKUP_ALIAS);
            FieldRefs::resolve(&expr.used_fields(), &right_fields, &CONSTANT_PACKAGES).map_err(
                |e| {
                    SchemaError::config(format!(
                        "lookup filter [{}] may only use lookup table fields: {e}",
                        raw.filter
                    ))
                },
            )?;
            Some(expr)
        };

        let index = right_table
            .indexes
            .get(&raw.index_name)
            .cloned()
            .ok_or_else(|| {
                SchemaError::config(format!(
                    "cannot find index {} in lookup table {}",
                    raw.index_name, right_table.name
                ))
            })?;

        let left_fields = resolve_join_on(&raw.join_on, src_alias, src_fields)?;
        let idx_fields = index.component_field_refs(&right_table.name);
        if idx_fields.len() != left_fields.len() {
            return Err(SchemaError::config(format!(
                "lookup joins on {} fields, while referenced index {} uses {} fields, these lengths need to be the same",
                left_fields.len(),
                raw.index_name,
                idx_fields.len()
            )));
        }
        for (left, right) in left_fields.iter().zip(idx_fields.iter()) {
            if left.field_type != right.field_type {
                return Err(SchemaError::config(format!(
                    "left-side field {} has type {}, while index field {} has type {}",
                    left.field_name, left.field_type, right.field_name, right.field_type
                )));
            }
        }

        Ok(Self {
            index_name: raw.index_name,
            left_fields,
            group: raw.group,
            raw_filter: raw.filter,
            filter,
            join_type,
            idx_read_batch_size,
            right_lookup_read_batch_size,
            right_table: right_table.clone(),
            index,
        })
    }

    /// Right table fields under the lookup alias.
    pub fn right_field_refs(&self) -> FieldRefs {
        self.right_table.field_refs_with_alias(LOOKUP_ALIAS)
    }

    /// Evaluates the filter against the right row's variables. No filter means pass.
    pub fn check_filter(&self, vars: &VarContext) -> SchemaResult<bool> {
        let Some(filter) = &self.filter else {
            return Ok(true);
        };
        match eval(filter, vars)
            .map_err(|e| SchemaError::config(format!("cannot evaluate expression: [{e}]")))?
        {
            ScalarValue::Bool(pass) => Ok(pass),
            other => Err(SchemaError::config(format!(
                "cannot evaluate lookup filter condition expression, expected bool, got {} instead",
                other.describe()
            ))),
        }
    }

    /// Encodes the join-on values of a left row as a key of the lookup index.
    ///
    /// Left fields map onto index components by position, so their names may differ.
    pub fn join_key(&self, left: &Rowset, row: usize) -> SchemaResult<String> {
        let mut values = HashMap::with_capacity(self.left_fields.len());
        for (field, component) in self.left_fields.iter().zip(&self.index.components) {
            let value = left.value(row, &field.table_name, &field.field_name)?;
            values.insert(component.field_name.clone(), value.clone());
        }
        build_key(&values, &self.index)
    }
}

fn page_size(name: &str, raw: i64, default: usize, max: usize) -> SchemaResult<usize> {
    if raw <= 0 {
        return Ok(default);
    }
    match usize::try_from(raw) {
        Ok(size) if size <= max => Ok(size),
        _ => Err(SchemaError::config(format!(
            "cannot use {name} {raw}, expected <= {max}, default {default}"
        ))),
    }
}

fn resolve_join_on(raw: &str, src_alias: &str, src_fields: &FieldRefs) -> SchemaResult<FieldRefs> {
    let mut out = FieldRefs::new();
    for part in raw.split(',') {
        let Some((alias, field)) = part.trim().split_once('.') else {
            return Err(SchemaError::config(format!(
                "expected a comma-separated list of <table_name>.<field_name>, got [{raw}]"
            )));
        };
        let (alias, field) = (alias.trim(), field.trim());
        if field.contains('.') {
            return Err(SchemaError::config(format!(
                "expected a comma-separated list of <table_name>.<field_name>, got [{raw}]"
            )));
        }
        if alias != src_alias {
            return Err(SchemaError::config(format!(
                "source table name [{alias}] unknown, expected [{src_alias}]"
            )));
        }
        let found = src_fields
            .find(alias, field)
            .ok_or_else(|| {
                SchemaError::config(format!("source [{alias}] does not produce field [{field}]"))
            })?;
        out.push(found.clone())?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_ref::FieldRef;
    use batchflow_eval::ValueType;
    use pretty_assertions::assert_eq;

    fn products() -> TableCreatorDef {
        TableCreatorDef::from_json(
            r#"{
                "name": "products",
                "fields": {
                    "sku": {"expression": "r.sku", "type": "string"},
                    "region": {"expression": "r.region", "type": "int"},
                    "price": {"expression": "r.price", "type": "decimal2"}
                },
                "indexes": {"idx_products_sku": "non_unique(sku(ignore_case), region)"}
            }"#,
        )
        .unwrap()
    }

    fn src_fields() -> FieldRefs {
        [
            FieldRef::rowid("r"),
            FieldRef::new("r", "product", ValueType::String),
            FieldRef::new("r", "zone", ValueType::Int),
            FieldRef::new("r", "qty", ValueType::Float),
        ]
        .into_iter()
        .collect()
    }

    fn spec(json: &str) -> SchemaResult<LookupSpec> {
        LookupSpec::from_json(json, "r", &src_fields(), &products())
    }

    #[test]
    fn builds_join_keys_positionally() {
        let lookup = spec(
            r#"{"index_name": "idx_products_sku", "join_on": "r.product, r.zone", "join_type": "left", "filter": "l.price > 1"}"#,
        )
        .unwrap();
        assert_eq!(lookup.join_type, JoinType::Left);
        assert_eq!(lookup.idx_read_batch_size, DEFAULT_IDX_READ_BATCH_SIZE);

        let mut left = Rowset::new(src_fields());
        left.init_rows(1);
        left.append_row(vec![1.into(), "widget".into(), 4.into(), 1.0.into()])
            .unwrap();
        let key = lookup.join_key(&left, 0).unwrap();
        let expected = build_key(
            &HashMap::from([
                ("sku".to_string(), ScalarValue::from("WIDGET")),
                ("region".to_string(), ScalarValue::Int(4)),
            ]),
            &lookup.index,
        )
        .unwrap();
        assert_eq!(key, expected);

        let vars = VarContext::new().with("l", "price", batchflow_eval::Decimal2::from(2));
        assert!(lookup.check_filter(&vars).unwrap());
    }

    #[test]
    fn validation_errors() {
        let cases = [
            (
                r#"{"index_name": "idx_products_sku", "join_on": "r.product", "join_type": "left"}"#,
                "lookup joins on 1 fields, while referenced index idx_products_sku uses 2 fields, these lengths need to be the same",
            ),
            (
                r#"{"index_name": "idx_products_sku", "join_on": "r.product, r.qty", "join_type": "inner"}"#,
                "left-side field qty has type float, while index field region has type int",
            ),
            (
                r#"{"index_name": "idx_products_sku", "join_on": "r.product, r.zone", "join_type": "outer"}"#,
                "invalid join type, expected inner or left, outer is not supported",
            ),
            (
                r#"{"index_name": "idx_products_sku", "join_on": "r.product, r.zone", "join_type": "inner", "idx_read_batch_size": 6000}"#,
                "cannot use idx_read_batch_size 6000, expected <= 5000, default 3000",
            ),
            (
                r#"{"index_name": "idx_nope", "join_on": "r.product, r.zone", "join_type": "inner"}"#,
                "cannot find index idx_nope in lookup table products",
            ),
        ];
        for (json, expected) in cases {
            assert_eq!(spec(json).unwrap_err().to_string(), expected);
        }
    }

    #[test]
    fn filter_may_only_read_lookup_fields() {
        let err = spec(
            r#"{"index_name": "idx_products_sku", "join_on": "r.product, r.zone", "join_type": "inner", "filter": "r.qty > 1"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("may only use lookup table fields"));
    }
}
