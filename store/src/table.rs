//! Tabular query results.

use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::error::{StoreError, StoreResult};
use crate::value::{FromValue, Value};

/// Column names plus rows of values, in backend order.
///
/// Column names are known even when there are no rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn row(&self, index: usize) -> Option<RowRef<'_>> {
        self.rows.get(index).map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    pub fn first(&self) -> Option<RowRef<'_>> {
        self.row(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(|values| RowRef {
            columns: &self.columns,
            values,
        })
    }

    /// Every value of one column, converted.
    pub fn column<T: FromValue>(&self, name: &str) -> StoreResult<Vec<T>> {
        self.iter().map(|row| row.get(name)).collect()
    }

    /// Single value of a one-row result, `None` when there are no rows.
    pub fn scalar<T: FromValue>(&self) -> StoreResult<Option<T>> {
        let Some(row) = self.first() else {
            return Ok(None);
        };
        let Some(column) = self.columns.first() else {
            return Ok(None);
        };
        row.get(column).map(Some)
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Map<String, Json>> {
        self.iter()
            .map(|row| {
                row.columns
                    .iter()
                    .zip(row.values)
                    .map(|(name, value)| (name.clone(), to_json(value)))
                    .collect()
            })
            .collect()
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(v) => Json::Bool(*v),
        Value::Int(v) => Json::from(*v),
        Value::Real(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
        Value::Text(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::Array(v.iter().map(|b| Json::from(*b)).collect()),
    }
}

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> RowRef<'a> {
    pub fn values(&self) -> &'a [Value] {
        self.values
    }

    pub fn value(&self, name: &str) -> StoreResult<&'a Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|index| self.values.get(index))
            .ok_or_else(|| StoreError::Decode {
                column: name.to_string(),
                reason: "no such column in result".to_string(),
            })
    }

    pub fn get<T: FromValue>(&self, name: &str) -> StoreResult<T> {
        let value = self.value(name)?;
        T::from_value(value).map_err(|reason| StoreError::Decode {
            column: name.to_string(),
            reason,
        })
    }
}
