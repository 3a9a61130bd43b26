//! Node definitions tie a reader, an output table and an optional lookup together and check
//! that every expression can run against the fields actually available to it.
use std::fmt;

use batchflow_eval::{
    default_datetime, eval, eval_with_aggregate, AggFunc, AggState, Decimal2, Expr, ScalarValue,
    ValueType, VarContext,
};

use crate::error::{SchemaError, SchemaResult};
use crate::field_ref::{FieldRefs, CREATOR_ALIAS, READER_ALIAS};
use crate::lookup::{LookupSpec, RawLookupSpec};
use crate::reader::TableReaderDef;
use crate::table_creator::TableCreatorDef;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Table,
    DistinctTable,
    LookupTable,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Table => "table_table",
            NodeKind::DistinctTable => "distinct_table",
            NodeKind::LookupTable => "table_lookup_table",
        })
    }
}

#[derive(Clone, Debug)]
pub struct TableNodeDef {
    pub name: String,
    pub kind: NodeKind,
    pub reader: TableReaderDef,
    /// Every field of the source table under the reader alias.
    pub reader_fields: FieldRefs,
    pub creator: TableCreatorDef,
    pub lookup: Option<LookupSpec>,
}

impl TableNodeDef {
    pub fn table(
        name: impl Into<String>,
        reader: TableReaderDef,
        source: &TableCreatorDef,
        creator: TableCreatorDef,
    ) -> SchemaResult<Self> {
        Self::build(name.into(), NodeKind::Table, reader, source, creator, None)
    }

    pub fn distinct_table(
        name: impl Into<String>,
        reader: TableReaderDef,
        source: &TableCreatorDef,
        creator: TableCreatorDef,
    ) -> SchemaResult<Self> {
        Self::build(name.into(), NodeKind::DistinctTable, reader, source, creator, None)
    }

    pub fn lookup_table(
        name: impl Into<String>,
        reader: TableReaderDef,
        source: &TableCreatorDef,
        creator: TableCreatorDef,
        lookup: RawLookupSpec,
        right: &TableCreatorDef,
    ) -> SchemaResult<Self> {
        let reader_fields = source.field_refs_with_alias(READER_ALIAS);
        let lookup = LookupSpec::new(lookup, READER_ALIAS, &reader_fields, right)?;
        Self::build(
            name.into(),
            NodeKind::LookupTable,
            reader,
            source,
            creator,
            Some(lookup),
        )
    }

    fn build(
        name: String,
        kind: NodeKind,
        reader: TableReaderDef,
        source: &TableCreatorDef,
        creator: TableCreatorDef,
        lookup: Option<LookupSpec>,
    ) -> SchemaResult<Self> {
        if reader.table != source.name {
            return Err(SchemaError::config(format!(
                "node {name} reads table {} but was given the definition of {}",
                reader.table, source.name
            )));
        }
        let node = Self {
            reader_fields: source.field_refs_with_alias(READER_ALIAS),
            name,
            kind,
            reader,
            creator,
            lookup,
        };
        node.validate()?;
        log::debug!(
            "{} node {} validated: {} -> {}",
            node.kind,
            node.name,
            node.reader.table,
            node.creator.name
        );
        Ok(node)
    }

    pub fn is_grouped(&self) -> bool {
        self.lookup.as_ref().is_some_and(|l| l.group)
    }

    /// Fields field expressions may read: reader fields plus lookup fields when joining.
    pub fn src_field_refs(&self) -> FieldRefs {
        let mut out = self.reader_fields.clone();
        if let Some(lookup) = &self.lookup {
            out.append_unique(&lookup.right_field_refs(), None);
        }
        out
    }

    fn validate(&self) -> SchemaResult<()> {
        let mut errors = Vec::new();
        let src_fields = self.src_field_refs();

        if let Err(err) = self.creator.check_used_fields(&src_fields) {
            errors.push(format!("node {}: {err}", self.name));
        }

        if let Some(lookup) = &self.lookup {
            if let Some(filter) = &lookup.filter {
                if let Err(err) =
                    check_expression_type(filter, &lookup.right_field_refs(), ValueType::Bool)
                {
                    errors.push(format!(
                        "cannot evaluate lookup filter expression [{}]: [{err}]",
                        lookup.raw_filter
                    ));
                }
            }
        }

        if let Some(having) = &self.creator.having {
            if self.kind == NodeKind::DistinctTable {
                errors.push(format!(
                    "distinct_table node {} cannot use a having condition",
                    self.name
                ));
            }
            let known = self.creator.field_refs_with_alias(CREATOR_ALIAS);
            if let Err(err) = check_expression_type(having, &known, ValueType::Bool) {
                errors.push(format!(
                    "cannot evaluate table creator 'having' expression [{}]: [{err}]",
                    self.creator.raw_having
                ));
            }
        }

        for field in &self.creator.fields {
            if !self.is_grouped() {
                if let Some(func) = find_aggregate(&field.expression) {
                    errors.push(format!(
                        "cannot use agg functions in [{}], lookup group flag is not set or no lookups used: found {}()",
                        field.raw_expression,
                        func.name()
                    ));
                    continue;
                }
            }
            if let Err(err) = check_expression_type(&field.expression, &src_fields, field.field_type)
            {
                errors.push(format!(
                    "cannot evaluate table creator target field {} expression [{}]: [{err}]",
                    field.name, field.raw_expression
                ));
            }
        }

        if self.kind == NodeKind::DistinctTable {
            if let Err(err) = self.creator.single_unique_index() {
                errors.push(err.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Multiple(errors))
        }
    }
}

/// Evaluates `expr` once against placeholder values of `fields` and checks the result type.
///
/// Aggregate roots run with a fresh state so their result type is probed too.
pub fn check_expression_type(
    expr: &Expr,
    fields: &FieldRefs,
    expected: ValueType,
) -> SchemaResult<()> {
    let mut vars = VarContext::new();
    for field in fields {
        vars.insert(
            field.table_name.clone(),
            field.field_name.clone(),
            sample_value(field.field_type),
        );
    }
    let value = match AggState::for_expr(expr)? {
        Some(mut state) => eval_with_aggregate(expr, &vars, &mut state)?,
        None => eval(expr, &vars)?,
    };
    if value.value_type() != expected {
        return Err(SchemaError::config(format!(
            "expected type {expected}, but got {}",
            value.describe()
        )));
    }
    Ok(())
}

fn sample_value(field_type: ValueType) -> ScalarValue {
    match field_type {
        ValueType::Int => ScalarValue::Int(0),
        ValueType::Float => ScalarValue::Float(0.0),
        ValueType::Bool => ScalarValue::Bool(false),
        // Parses as a number in case the expression converts it.
        ValueType::String => ScalarValue::from("12345.67"),
        ValueType::DateTime => ScalarValue::DateTime(default_datetime()),
        ValueType::Decimal2 => ScalarValue::Decimal(Decimal2::from_cents(234)),
    }
}

fn find_aggregate(expr: &Expr) -> Option<AggFunc> {
    match expr {
        Expr::Call { name, args, .. } => {
            AggFunc::from_name(name).or_else(|| args.iter().find_map(find_aggregate))
        }
        Expr::UnaryOp { expr, .. } => find_aggregate(expr),
        Expr::BinaryOp { left, right, .. } => {
            find_aggregate(left).or_else(|| find_aggregate(right))
        }
        Expr::Int(_) | Expr::Float(_) | Expr::Text(_) | Expr::Ident(_) | Expr::Selector { .. } => {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn orders() -> TableCreatorDef {
        TableCreatorDef::from_json(
            r#"{
                "name": "orders",
                "fields": {
                    "order_id": {"expression": "r.id", "type": "int"},
                    "sku": {"expression": "r.sku", "type": "string"},
                    "qty": {"expression": "r.qty", "type": "int"}
                }
            }"#,
        )
        .unwrap()
    }

    fn products() -> TableCreatorDef {
        TableCreatorDef::from_json(
            r#"{
                "name": "products",
                "fields": {
                    "sku": {"expression": "r.sku", "type": "string"},
                    "price": {"expression": "r.price", "type": "decimal2"}
                },
                "indexes": {"idx_products_sku": "unique(sku)"}
            }"#,
        )
        .unwrap()
    }

    fn reader(table: &str) -> TableReaderDef {
        TableReaderDef::from_json(&format!(r#"{{"table": "{table}"}}"#)).unwrap()
    }

    fn raw_lookup(group: bool) -> RawLookupSpec {
        serde_json::from_value(serde_json::json!({
            "index_name": "idx_products_sku",
            "join_on": "r.sku",
            "group": group,
            "join_type": "left"
        }))
        .unwrap()
    }

    fn creator(fields: &str) -> TableCreatorDef {
        TableCreatorDef::from_json(&format!(r#"{{"name": "order_totals", "fields": {{{fields}}}}}"#))
            .unwrap()
    }

    #[test]
    fn grouped_lookup_node_validates() {
        let node = TableNodeDef::lookup_table(
            "totals",
            reader("orders"),
            &orders(),
            creator(
                r#""order_id": {"expression": "r.order_id", "type": "int"},
                   "total": {"expression": "sum(l.price * r.qty)", "type": "decimal2"}"#,
            ),
            raw_lookup(true),
            &products(),
        )
        .unwrap();
        assert!(node.is_grouped());
        assert_eq!(node.src_field_refs().len(), 5);
    }

    #[test]
    fn aggregates_need_grouping() {
        let err = TableNodeDef::lookup_table(
            "totals",
            reader("orders"),
            &orders(),
            creator(r#""total": {"expression": "sum(l.price)", "type": "decimal2"}"#),
            raw_lookup(false),
            &products(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("lookup group flag is not set"), "{err}");
    }

    #[test]
    fn expression_types_are_probed() {
        let err = TableNodeDef::table(
            "copy",
            reader("orders"),
            &orders(),
            creator(r#""label": {"expression": "r.qty + 1", "type": "string"}"#),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot evaluate table creator target field label expression [r.qty + 1]: [expected type string, but got 1(int)]"
        );
    }

    #[test]
    fn distinct_nodes_need_one_unique_index() {
        let err = TableNodeDef::distinct_table(
            "skus",
            reader("orders"),
            &orders(),
            creator(r#""sku": {"expression": "r.sku", "type": "string"}"#),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no unique indexes"), "{err}");
    }

    #[test]
    fn reader_must_match_source() {
        assert!(TableNodeDef::table("copy", reader("other"), &orders(), orders()).is_err());
    }
}
