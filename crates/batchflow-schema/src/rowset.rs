use std::collections::HashMap;

use batchflow_eval::{ScalarValue, VarContext};

use crate::error::{SchemaError, SchemaResult};
use crate::field_ref::{FieldRef, FieldRefs, ROWID_FIELD};

/// A page of rows sharing one schema.
///
/// Slots are preallocated by [`Rowset::init_rows`] and reused across pages: [`Rowset::reset`]
/// only rewinds the row count.
#[derive(Clone, Debug)]
pub struct Rowset {
    fields: FieldRefs,
    by_alias_hash: HashMap<String, usize>,
    rows: Vec<Vec<ScalarValue>>,
    row_count: usize,
}

impl Rowset {
    pub fn new(fields: FieldRefs) -> Self {
        let by_alias_hash = fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.alias_hash(), idx))
            .collect();
        Self {
            fields,
            by_alias_hash,
            rows: Vec::new(),
            row_count: 0,
        }
    }

    /// Allocates `capacity` rows filled with the zero value of each column.
    pub fn init_rows(&mut self, capacity: usize) {
        let zero: Vec<ScalarValue> = self
            .fields
            .iter()
            .map(|f| f.field_type.zero_value())
            .collect();
        self.rows = vec![zero; capacity];
        self.row_count = 0;
    }

    pub fn reset(&mut self) {
        self.row_count = 0;
    }

    pub fn fields(&self) -> &FieldRefs {
        &self.fields
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    pub fn field_index(&self, alias: &str, field: &str) -> Option<usize> {
        self.by_alias_hash.get(&format!("{alias}.{field}")).copied()
    }

    /// Appends a row into the next free preallocated slot.
    pub fn append_row(&mut self, values: Vec<ScalarValue>) -> SchemaResult<usize> {
        self.check_row(&values)?;
        let row = self.row_count;
        let capacity = self.rows.len();
        let slot = self
            .rows
            .get_mut(row)
            .ok_or(SchemaError::RowsetFull { capacity })?;
        *slot = values;
        self.row_count += 1;
        Ok(row)
    }

    pub fn set_row(&mut self, row: usize, values: Vec<ScalarValue>) -> SchemaResult<()> {
        self.check_row_index(row)?;
        self.check_row(&values)?;
        self.rows[row] = values;
        Ok(())
    }

    pub fn set_value(
        &mut self,
        row: usize,
        alias: &str,
        field: &str,
        value: ScalarValue,
    ) -> SchemaResult<()> {
        self.check_row_index(row)?;
        let (idx, field_ref) = self
            .field_index(alias, field)
            .and_then(|idx| Some((idx, self.fields.get(idx)?)))
            .ok_or_else(|| SchemaError::UnknownField(format!("{alias}.{field}")))?;
        check_type(field_ref, &value)?;
        self.rows[row][idx] = value;
        Ok(())
    }

    pub fn value(&self, row: usize, alias: &str, field: &str) -> SchemaResult<&ScalarValue> {
        self.check_row_index(row)?;
        let idx = self
            .field_index(alias, field)
            .ok_or_else(|| SchemaError::UnknownField(format!("{alias}.{field}")))?;
        Ok(&self.rows[row][idx])
    }

    /// Row id of `row`, taken from the first `rowid` column.
    pub fn rowid(&self, row: usize) -> SchemaResult<i64> {
        self.check_row_index(row)?;
        let idx = self
            .fields
            .iter()
            .position(|f| f.field_name == ROWID_FIELD)
            .ok_or_else(|| SchemaError::UnknownField(ROWID_FIELD.to_string()))?;
        match &self.rows[row][idx] {
            ScalarValue::Int(v) => Ok(*v),
            other => Err(SchemaError::FieldType {
                field: ROWID_FIELD.to_string(),
                expected: "int".to_string(),
                value: other.describe(),
            }),
        }
    }

    /// Copies `row` into `vars` under each field's own alias, or under `alias_override` for all.
    pub fn export_to_vars(
        &self,
        row: usize,
        vars: &mut VarContext,
        alias_override: Option<&str>,
    ) -> SchemaResult<()> {
        self.check_row_index(row)?;
        for (field, value) in self.fields.iter().zip(&self.rows[row]) {
            let alias = alias_override.unwrap_or(&field.table_name);
            vars.insert(alias, field.field_name.clone(), value.clone());
        }
        Ok(())
    }

    /// `row` keyed by field name, the shape key building expects.
    pub fn table_record(&self, row: usize) -> SchemaResult<HashMap<String, ScalarValue>> {
        self.check_row_index(row)?;
        Ok(self
            .fields
            .iter()
            .zip(&self.rows[row])
            .map(|(f, v)| (f.field_name.clone(), v.clone()))
            .collect())
    }

    fn check_row_index(&self, row: usize) -> SchemaResult<()> {
        if row >= self.row_count {
            return Err(SchemaError::RowOutOfRange {
                row,
                row_count: self.row_count,
            });
        }
        Ok(())
    }

    fn check_row(&self, values: &[ScalarValue]) -> SchemaResult<()> {
        if values.len() != self.fields.len() {
            return Err(SchemaError::config(format!(
                "row has {} values, rowset has {} fields",
                values.len(),
                self.fields.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(values) {
            check_type(field, value)?;
        }
        Ok(())
    }
}

fn check_type(field: &FieldRef, value: &ScalarValue) -> SchemaResult<()> {
    if value.value_type() != field.field_type {
        return Err(SchemaError::FieldType {
            field: field.alias_hash(),
            expected: field.field_type.to_string(),
            value: value.describe(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchflow_eval::{default_datetime, ValueType};
    use pretty_assertions::assert_eq;

    fn rowset() -> Rowset {
        let fields: FieldRefs = [
            FieldRef::rowid("r"),
            FieldRef::new("r", "name", ValueType::String),
            FieldRef::new("r", "seen", ValueType::DateTime),
        ]
        .into_iter()
        .collect();
        let mut rs = Rowset::new(fields);
        rs.init_rows(4);
        rs
    }

    #[test]
    fn appends_into_preallocated_slots() {
        let mut rs = rowset();
        assert_eq!(rs.capacity(), 4);
        let row = rs
            .append_row(vec![7.into(), "x".into(), default_datetime().into()])
            .unwrap();
        assert_eq!(row, 0);
        assert_eq!(rs.rowid(0).unwrap(), 7);
        assert!(rs.rowid(1).is_err());

        rs.reset();
        assert_eq!(rs.row_count(), 0);
        assert_eq!(rs.capacity(), 4);
    }

    #[test]
    fn append_past_capacity_fails() {
        let mut rs = rowset();
        rs.init_rows(1);
        rs.append_row(vec![1.into(), "a".into(), default_datetime().into()])
            .unwrap();
        let err = rs
            .append_row(vec![2.into(), "b".into(), default_datetime().into()])
            .unwrap_err();
        assert_eq!(err.to_string(), "rowset is full, capacity 1");
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.capacity(), 1);
    }

    #[test]
    fn rejects_mistyped_values() {
        let mut rs = rowset();
        let err = rs
            .append_row(vec![7.into(), 1.into(), default_datetime().into()])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid field r.name type: expected type string, but got 1(int)"
        );
    }

    #[test]
    fn exports_with_alias_override() {
        let mut rs = rowset();
        rs.append_row(vec![1.into(), "a".into(), default_datetime().into()])
            .unwrap();
        rs.set_value(0, "r", "name", "b".into()).unwrap();

        let mut vars = VarContext::new();
        rs.export_to_vars(0, &mut vars, None).unwrap();
        assert_eq!(vars.get("r", "name"), Some(&ScalarValue::from("b")));

        let mut vars = VarContext::new();
        rs.export_to_vars(0, &mut vars, Some("l")).unwrap();
        assert_eq!(vars.get("l", "rowid"), Some(&ScalarValue::Int(1)));
        assert!(!vars.contains_alias("r"));

        let record = rs.table_record(0).unwrap();
        assert_eq!(record.get("name"), Some(&ScalarValue::from("b")));
    }
}
