//! Output table definitions: typed field expressions, defaults, `having` and indexes.
use std::collections::{BTreeMap, HashMap};

use batchflow_eval::functions::parse_go_time;
use batchflow_eval::{
    detect_root_agg, eval, eval_with_aggregate, parse, AggFunc, AggState, Decimal2, Expr,
    ScalarValue, ValueType, VarContext,
};
use serde::Deserialize;

use crate::error::{SchemaError, SchemaResult};
use crate::field_ref::{FieldRef, FieldRefs, CREATOR_ALIAS};
use crate::index::{parse_index_map, IdxDef, IdxDefMap};

pub const MAX_TABLE_NAME_LEN: usize = 42;

const PROHIBITED_TABLE_PREFIXES: [&str; 3] = ["idx", "wf", "system"];

/// Layout of datetime default values.
pub const DEFAULT_DATETIME_LAYOUT: &str = "2006-01-02T15:04:05.000-07:00";

/// Aliases that name constant packages rather than tables.
pub const CONSTANT_PACKAGES: [&str; 1] = ["time"];

/// One computed output record, field name to value.
pub type TableRecord = HashMap<String, ScalarValue>;

#[derive(Clone, Debug, Deserialize)]
pub struct RawFieldDef {
    pub expression: String,
    #[serde(rename = "type")]
    pub field_type: ValueType,
    #[serde(default)]
    pub default_value: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawTableCreatorDef {
    pub name: String,
    #[serde(default)]
    pub having: String,
    #[serde(default)]
    pub fields: BTreeMap<String, RawFieldDef>,
    #[serde(default)]
    pub indexes: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub field_type: ValueType,
    pub raw_expression: String,
    pub expression: Expr,
    pub default_value: String,
    /// `alias.field` pairs the expression reads.
    pub used_fields: Vec<(String, String)>,
    pub root_agg: Option<AggFunc>,
}

impl FieldDef {
    fn from_raw(name: &str, raw: &RawFieldDef) -> SchemaResult<Self> {
        let expression = parse(&raw.expression).map_err(|e| {
            SchemaError::config(format!(
                "cannot parse field expression [{}]: [{e}]",
                raw.expression
            ))
        })?;
        Ok(Self {
            name: name.to_string(),
            field_type: raw.field_type,
            raw_expression: raw.expression.clone(),
            used_fields: expression.used_fields(),
            root_agg: detect_root_agg(&expression),
            expression,
            default_value: raw.default_value.trim().to_string(),
        })
    }

    /// Evaluates the field against `vars`. Without `agg` any aggregate call is an error.
    pub fn calculate(
        &self,
        vars: &VarContext,
        agg: Option<&mut AggState>,
    ) -> SchemaResult<ScalarValue> {
        let value = match agg {
            Some(state) => eval_with_aggregate(&self.expression, vars, state),
            None => eval(&self.expression, vars),
        }
        .map_err(|source| SchemaError::FieldEval {
            field: self.name.clone(),
            source,
        })?;
        check_value_type(&self.name, &value, self.field_type)?;
        Ok(value)
    }

    /// The value the field takes when nothing was computed for it.
    pub fn default_value(&self) -> SchemaResult<ScalarValue> {
        let raw = self.default_value.as_str();
        if raw.is_empty() {
            return Ok(self.field_type.zero_value());
        }
        let invalid = |detail: String| {
            SchemaError::config(format!(
                "cannot read {} field {} from default value string '{raw}': {detail}",
                self.field_type, self.name
            ))
        };
        match self.field_type {
            ValueType::Int => raw
                .parse::<i64>()
                .map(ScalarValue::Int)
                .map_err(|e| invalid(e.to_string())),
            ValueType::Float => raw
                .parse::<f64>()
                .map(ScalarValue::Float)
                .map_err(|e| invalid(e.to_string())),
            ValueType::Decimal2 => raw
                .parse::<Decimal2>()
                .map(ScalarValue::Decimal)
                .map_err(|e| invalid(e.to_string())),
            ValueType::String => Ok(ScalarValue::Str(raw.to_string())),
            ValueType::Bool => parse_bool(raw)
                .map(ScalarValue::Bool)
                .ok_or_else(|| invalid("allowed values are true,false,T,F,0,1".to_string())),
            ValueType::DateTime => parse_go_time(DEFAULT_DATETIME_LAYOUT, raw)
                .map(ScalarValue::DateTime)
                .map_err(invalid),
        }
    }

    pub fn uses_alias(&self, alias: &str) -> bool {
        self.used_fields.iter().any(|(a, _)| a == alias)
    }
}

/// Definition of a table a node writes to.
#[derive(Clone, Debug)]
pub struct TableCreatorDef {
    pub name: String,
    pub raw_having: String,
    pub having: Option<Expr>,
    /// Sorted by field name.
    pub fields: Vec<FieldDef>,
    pub indexes: IdxDefMap,
}

impl TableCreatorDef {
    pub fn from_json(json: &str) -> SchemaResult<Self> {
        let raw: RawTableCreatorDef = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawTableCreatorDef) -> SchemaResult<Self> {
        validate_table_name(&raw.name)?;

        let having = if raw.having.trim().is_empty() {
            None
        } else {
            Some(parse(&raw.having).map_err(|e| {
                SchemaError::config(format!(
                    "cannot parse table creator 'having' condition [{}]: [{e}]",
                    raw.having
                ))
            })?)
        };

        let fields = raw
            .fields
            .iter()
            .map(|(name, def)| FieldDef::from_raw(name, def))
            .collect::<SchemaResult<Vec<_>>>()?;

        let mut def = Self {
            name: raw.name,
            raw_having: raw.having,
            having,
            fields,
            indexes: IdxDefMap::new(),
        };
        def.indexes = parse_index_map(&raw.indexes, &def.field_refs())?;

        let mut errors = Vec::new();
        for field in &def.fields {
            if let Err(err) = field.default_value() {
                errors.push(err.to_string());
            }
        }
        if let Some(having) = &def.having {
            let known = def.field_refs_with_alias(CREATOR_ALIAS);
            if let Err(err) = FieldRefs::resolve(&having.used_fields(), &known, &CONSTANT_PACKAGES) {
                errors.push(format!("'having' condition: {err}"));
            }
        }
        if !errors.is_empty() {
            return Err(SchemaError::Multiple(errors));
        }
        Ok(def)
    }

    /// Output fields bound to the table name.
    pub fn field_refs(&self) -> FieldRefs {
        self.field_refs_with_alias(&self.name)
    }

    pub fn field_refs_with_alias(&self, alias: &str) -> FieldRefs {
        self.fields
            .iter()
            .map(|f| FieldRef::new(alias, f.name.clone(), f.field_type))
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every `alias.field` pair read by any field expression, in first-use order.
    pub fn used_in_target_expressions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for pair in self.fields.iter().flat_map(|f| f.used_fields.iter()) {
            if !out.contains(pair) {
                out.push(pair.clone());
            }
        }
        out
    }

    /// Checks every field expression only reads fields in `known`.
    pub fn check_used_fields(&self, known: &FieldRefs) -> SchemaResult<FieldRefs> {
        FieldRefs::resolve(&self.used_in_target_expressions(), known, &CONSTANT_PACKAGES)
    }

    pub fn has_aggregates(&self) -> bool {
        self.fields.iter().any(|f| f.root_agg.is_some())
    }

    /// Computes every field from `vars` with aggregates disabled, reporting all failing fields.
    pub fn calculate_record(&self, vars: &VarContext) -> SchemaResult<TableRecord> {
        let mut record = TableRecord::with_capacity(self.fields.len());
        let mut errors = Vec::new();
        for field in &self.fields {
            match field.calculate(vars, None) {
                Ok(value) => {
                    record.insert(field.name.clone(), value);
                }
                Err(err) => errors.push(err.to_string()),
            }
        }
        if errors.is_empty() {
            Ok(record)
        } else {
            Err(SchemaError::Multiple(errors))
        }
    }

    /// Evaluates `having` with the record's fields under `w`. No condition means pass.
    pub fn check_having(&self, record: &TableRecord) -> SchemaResult<bool> {
        let Some(having) = &self.having else {
            return Ok(true);
        };
        let mut vars = VarContext::new();
        vars.set_alias(CREATOR_ALIAS, record.clone());
        let value = eval(having, &vars).map_err(|e| {
            SchemaError::config(format!("cannot evaluate 'having' expression: [{e}]"))
        })?;
        match value {
            ScalarValue::Bool(pass) => Ok(pass),
            other => Err(SchemaError::config(format!(
                "cannot get bool when evaluating having expression, got {} instead",
                other.describe()
            ))),
        }
    }

    pub fn default_value(&self, field_name: &str) -> SchemaResult<ScalarValue> {
        self.field(field_name)
            .ok_or_else(|| SchemaError::config(format!("default for unknown field {field_name}")))?
            .default_value()
    }

    /// The one unique index, required by distinct tables.
    pub fn single_unique_index(&self) -> SchemaResult<(&str, &IdxDef)> {
        let mut unique = self.indexes.iter().filter(|(_, idx)| idx.is_unique());
        match (unique.next(), unique.next()) {
            (Some((name, idx)), None) => Ok((name.as_str(), idx)),
            (None, _) => Err(SchemaError::config(format!(
                "table {} has no unique indexes, expected exactly one unique idx definition",
                self.name
            ))),
            (Some(_), Some(_)) => Err(SchemaError::config(format!(
                "table {} has more than one unique index, expected exactly one unique idx definition",
                self.name
            ))),
        }
    }
}

/// Checks `value` has the declared type of `field`.
pub fn check_value_type(field: &str, value: &ScalarValue, expected: ValueType) -> SchemaResult<()> {
    if value.value_type() == expected {
        Ok(())
    } else {
        Err(SchemaError::FieldType {
            field: field.to_string(),
            expected: expected.to_string(),
            value: value.describe(),
        })
    }
}

fn validate_table_name(name: &str) -> SchemaResult<()> {
    if let Some(prefix) = PROHIBITED_TABLE_PREFIXES
        .iter()
        .find(|p| name.starts_with(*p))
    {
        return Err(SchemaError::config(format!(
            "invalid table name [{name}]: names starting with {prefix} are reserved"
        )));
    }
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SchemaError::config(format!(
            "invalid table name [{name}]: only letters, digits and underscores are allowed"
        )));
    }
    if name.len() > MAX_TABLE_NAME_LEN {
        return Err(SchemaError::config(format!(
            "table name [{name}] too long: max allowed {MAX_TABLE_NAME_LEN}"
        )));
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchflow_eval::default_datetime;
    use pretty_assertions::assert_eq;

    const ORDERS: &str = r#"{
        "name": "order_totals",
        "having": "w.total > 10",
        "fields": {
            "order_id": {"expression": "r.order_id", "type": "int"},
            "total": {"expression": "r.price * r.qty", "type": "decimal2", "default_value": "-1.5"},
            "label": {"expression": "string(r.order_id) + r.tag", "type": "string"}
        },
        "indexes": {
            "idx_order": "unique(order_id)",
            "idx_label": "non_unique(label(ignore_case))"
        }
    }"#;

    fn vars(qty: i64) -> VarContext {
        VarContext::new()
            .with("r", "order_id", 7)
            .with("r", "price", Decimal2::from_cents(250))
            .with("r", "qty", qty)
            .with("r", "tag", "x")
    }

    #[test]
    fn parses_fields_in_name_order() {
        let def = TableCreatorDef::from_json(ORDERS).unwrap();
        let names: Vec<&str> = def.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["label", "order_id", "total"]);
        assert_eq!(def.indexes.len(), 2);
        assert_eq!(def.single_unique_index().unwrap().0, "idx_order");
        assert_eq!(def.used_in_target_expressions().len(), 4);
    }

    #[test]
    fn calculates_and_filters_records() {
        let def = TableCreatorDef::from_json(ORDERS).unwrap();
        let record = def.calculate_record(&vars(5)).unwrap();
        assert_eq!(record["total"], ScalarValue::Decimal(Decimal2::from_cents(1250)));
        assert_eq!(record["label"], ScalarValue::from("7x"));
        assert!(def.check_having(&record).unwrap());

        let record = def.calculate_record(&vars(2)).unwrap();
        assert!(!def.check_having(&record).unwrap());
    }

    #[test]
    fn record_errors_are_collected() {
        let def = TableCreatorDef::from_json(ORDERS).unwrap();
        let vars = VarContext::new().with("r", "order_id", "seven");
        let err = def.calculate_record(&vars).unwrap_err().to_string();
        assert!(err.contains("cannot evaluate expression for field label"), "{err}");
        assert!(err.contains("invalid field order_id type: expected type int, but got seven(string)"), "{err}");
    }

    #[test]
    fn defaults_parse_per_type() {
        let def = TableCreatorDef::from_json(ORDERS).unwrap();
        assert_eq!(
            def.default_value("total").unwrap(),
            ScalarValue::Decimal(Decimal2::from_cents(-150))
        );
        assert_eq!(def.default_value("label").unwrap(), ScalarValue::from(""));
        assert!(def.default_value("missing").is_err());

        let field = |field_type, default_value: &str| FieldDef {
            name: "f".into(),
            field_type,
            raw_expression: "1".into(),
            expression: Expr::Int(1),
            default_value: default_value.into(),
            used_fields: Vec::new(),
            root_agg: None,
        };
        assert_eq!(field(ValueType::Bool, "T").default_value().unwrap(), ScalarValue::Bool(true));
        assert!(field(ValueType::Bool, "yes").default_value().is_err());
        assert_eq!(
            field(ValueType::DateTime, "").default_value().unwrap(),
            ScalarValue::DateTime(default_datetime())
        );
        let ScalarValue::DateTime(t) = field(ValueType::DateTime, "2024-02-03T04:05:06.789+02:00")
            .default_value()
            .unwrap()
        else {
            panic!("expected datetime");
        };
        assert_eq!(t.timestamp_millis() % 1000, 789);
    }

    #[test]
    fn rejects_bad_names_and_having() {
        for name in ["idx_orders", "system_x", "with space", ""] {
            let json = format!(r#"{{"name": "{name}", "fields": {{}}}}"#);
            assert!(TableCreatorDef::from_json(&json).is_err(), "{name} should fail");
        }
        let json = r#"{"name": "t", "having": "w.nope > 1", "fields": {"a": {"expression": "1", "type": "int"}}}"#;
        let err = TableCreatorDef::from_json(json).unwrap_err().to_string();
        assert_eq!(err, "'having' condition: unknown field w.nope");
    }

    #[test]
    fn aggregates_require_state() {
        let json = r#"{"name": "t", "fields": {"n": {"expression": "count()", "type": "int"}}}"#;
        let def = TableCreatorDef::from_json(json).unwrap();
        assert!(def.has_aggregates());
        assert!(def.calculate_record(&VarContext::new()).is_err());

        let mut state = AggState::new();
        let field = &def.fields[0];
        field.calculate(&VarContext::new(), Some(&mut state)).unwrap();
        assert_eq!(
            field.calculate(&VarContext::new(), Some(&mut state)).unwrap(),
            ScalarValue::Int(2)
        );
    }
}
