//! Index definitions: `unique(a, b(desc, ignore_case, 32))` / `non_unique(a)`.
//!
//! Definitions are written in the same expression syntax as field expressions, so the expression
//! parser does the tokenizing; this module only interprets the resulting call tree.
use std::collections::BTreeMap;
use std::fmt;

use batchflow_eval::{parse, Expr, ValueType};
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::field_ref::{FieldRef, FieldRefs};

pub const DEFAULT_STRING_COMPONENT_LEN: usize = 64;
pub const MIN_STRING_COMPONENT_LEN: usize = 16;
pub const MAX_STRING_COMPONENT_LEN: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    CaseSensitive,
    IgnoreCase,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Uniqueness {
    Unique,
    NonUnique,
}

impl fmt::Display for Uniqueness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Uniqueness::Unique => "unique",
            Uniqueness::NonUnique => "non_unique",
        })
    }
}

/// One column of an index key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdxComponent {
    pub field_name: String,
    pub field_type: ValueType,
    pub sort_order: SortOrder,
    /// Meaningful for string components only.
    pub case_sensitivity: CaseSensitivity,
    /// Width in characters, string components only.
    pub string_len: usize,
}

impl IdxComponent {
    pub fn new(field_name: impl Into<String>, field_type: ValueType) -> Self {
        Self {
            field_name: field_name.into(),
            field_type,
            sort_order: SortOrder::Asc,
            case_sensitivity: CaseSensitivity::CaseSensitive,
            string_len: DEFAULT_STRING_COMPONENT_LEN,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdxDef {
    pub uniqueness: Uniqueness,
    pub components: Vec<IdxComponent>,
}

/// Index name to definition.
pub type IdxDefMap = BTreeMap<String, IdxDef>;

impl IdxDef {
    pub fn is_unique(&self) -> bool {
        self.uniqueness == Uniqueness::Unique
    }

    /// Component fields as [`FieldRef`]s bound to `table_name`, in key order.
    pub fn component_field_refs(&self, table_name: &str) -> FieldRefs {
        self.components
            .iter()
            .map(|c| FieldRef::new(table_name, c.field_name.clone(), c.field_type))
            .collect()
    }

    /// Parses a raw definition, resolving component types by field name in `fields`.
    pub fn parse(raw: &str, fields: &FieldRefs) -> SchemaResult<Self> {
        let invalid = |message: String| SchemaError::IndexDef {
            def: raw.to_string(),
            message,
        };
        let expr = parse(raw).map_err(|e| invalid(e.to_string()))?;
        let Expr::Call { name, args, .. } = expr else {
            return Err(invalid(
                "expected top level unique() or non_unique() definition".into(),
            ));
        };
        let uniqueness = match name.as_str() {
            "unique" => Uniqueness::Unique,
            "non_unique" => Uniqueness::NonUnique,
            other => {
                return Err(invalid(format!(
                    "expected top level unique() or non_unique() definition, found {other}"
                )))
            }
        };
        if args.is_empty() {
            return Err(invalid("index must have at least one component".into()));
        }

        let mut components = Vec::with_capacity(args.len());
        let mut errors = Vec::new();
        for arg in &args {
            match parse_component(arg, fields) {
                Ok(component) => components.push(component),
                Err(message) => errors.push(message),
            }
        }
        if !errors.is_empty() {
            return Err(invalid(errors.join("; ")));
        }
        Ok(Self {
            uniqueness,
            components,
        })
    }
}

fn parse_component(expr: &Expr, fields: &FieldRefs) -> Result<IdxComponent, String> {
    let (field_name, modifiers) = match expr {
        Expr::Ident(name) => (name, &[][..]),
        Expr::Call { name, args, .. } if !name.contains('.') => (name, args.as_slice()),
        _ => {
            return Err("invalid index component, expected 'field' or 'field(modifiers)' where 'field' is one of the fields of the table".into())
        }
    };
    let field = fields
        .find_by_field_name(field_name)
        .ok_or_else(|| format!("field {field_name} unknown"))?;

    let mut component = IdxComponent::new(field_name.clone(), field.field_type);
    let mut case_given = false;
    for modifier in modifiers {
        match modifier {
            Expr::Ident(m) => match m.as_str() {
                "asc" => component.sort_order = SortOrder::Asc,
                "desc" => component.sort_order = SortOrder::Desc,
                "case_sensitive" => {
                    component.case_sensitivity = CaseSensitivity::CaseSensitive;
                    case_given = true;
                }
                "ignore_case" => {
                    component.case_sensitivity = CaseSensitivity::IgnoreCase;
                    case_given = true;
                }
                other => {
                    return Err(format!(
                        "unknown modifier {other} for field {field_name}, expected ignore_case,case_sensitive,asc,desc"
                    ))
                }
            },
            Expr::Int(len) => {
                if component.field_type != ValueType::String {
                    return Err(format!(
                        "component length modifier is valid only for string fields, but {field_name} has type {}",
                        component.field_type
                    ));
                }
                let len = usize::try_from(*len).unwrap_or(0);
                if len > MAX_STRING_COMPONENT_LEN {
                    return Err(format!(
                        "component length modifier for string fields cannot exceed {MAX_STRING_COMPONENT_LEN}"
                    ));
                }
                component.string_len = len.max(MIN_STRING_COMPONENT_LEN);
            }
            _ => {
                return Err(format!(
                    "invalid modifier for field {field_name}: expected ignore_case,case_sensitive,asc,desc or an integer"
                ))
            }
        }
    }
    if case_given && component.field_type != ValueType::String {
        return Err(format!(
            "index component for field {field_name} of type {} cannot have case sensitivity modifier, remove it from index component definition",
            component.field_type
        ));
    }
    Ok(component)
}

/// Parses every raw index of a table, collecting all failures.
pub fn parse_index_map(raw: &BTreeMap<String, String>, fields: &FieldRefs) -> SchemaResult<IdxDefMap> {
    let mut out = IdxDefMap::new();
    let mut errors = Vec::new();
    for (name, def) in raw {
        if !is_valid_index_name(name) {
            errors.push(format!(
                "invalid index name [{name}]: expected idx followed by letters, digits or underscores"
            ));
            continue;
        }
        match IdxDef::parse(def, fields) {
            Ok(idx) => {
                out.insert(name.clone(), idx);
            }
            Err(err) => errors.push(format!("index {name}: {err}")),
        }
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(SchemaError::Multiple(errors))
    }
}

fn is_valid_index_name(name: &str) -> bool {
    name.len() <= crate::table_creator::MAX_TABLE_NAME_LEN
        && name
            .strip_prefix("idx")
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fields() -> FieldRefs {
        [
            FieldRef::new("w", "name", ValueType::String),
            FieldRef::new("w", "qty", ValueType::Int),
            FieldRef::new("w", "price", ValueType::Decimal2),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn parses_components_with_modifiers() {
        let idx = IdxDef::parse("unique(qty(desc), name(ignore_case, 32), price)", &fields()).unwrap();
        assert!(idx.is_unique());
        assert_eq!(
            idx.components,
            vec![
                IdxComponent {
                    sort_order: SortOrder::Desc,
                    ..IdxComponent::new("qty", ValueType::Int)
                },
                IdxComponent {
                    case_sensitivity: CaseSensitivity::IgnoreCase,
                    string_len: 32,
                    ..IdxComponent::new("name", ValueType::String)
                },
                IdxComponent::new("price", ValueType::Decimal2),
            ]
        );
    }

    #[test]
    fn short_lengths_clamp_and_long_lengths_fail() {
        let idx = IdxDef::parse("non_unique(name(3))", &fields()).unwrap();
        assert_eq!(idx.uniqueness, Uniqueness::NonUnique);
        assert_eq!(idx.components[0].string_len, MIN_STRING_COMPONENT_LEN);
        assert!(IdxDef::parse("non_unique(name(2000))", &fields()).is_err());
    }

    #[test]
    fn rejects_string_modifiers_on_other_types() {
        let err = IdxDef::parse("unique(qty(ignore_case))", &fields()).unwrap_err();
        assert!(err.to_string().contains("cannot have case sensitivity modifier"));
        assert!(IdxDef::parse("unique(qty(20))", &fields()).is_err());
    }

    #[test]
    fn rejects_malformed_definitions() {
        for raw in ["sorted(qty)", "unique()", "unique(missing)", "unique(qty(up))", "qty"] {
            assert!(IdxDef::parse(raw, &fields()).is_err(), "{raw} should fail");
        }
    }

    #[test]
    fn index_names_are_validated() {
        let mut raw = BTreeMap::new();
        raw.insert("idx_by_name".to_string(), "unique(name)".to_string());
        assert_eq!(parse_index_map(&raw, &fields()).unwrap().len(), 1);
        raw.insert("by_qty".to_string(), "non_unique(qty)".to_string());
        assert!(parse_index_map(&raw, &fields()).is_err());
    }
}
