//! Row decoding into [`Value`]s, keyed on the runtime type of each cell.

use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::error::{StoreError, StoreResult};
use crate::value::Value;

fn unsupported(column: &str, type_name: &str) -> StoreError {
    StoreError::Decode {
        column: column.to_string(),
        reason: format!("unsupported column type {type_name}"),
    }
}

pub(crate) fn sqlite_row(row: &SqliteRow) -> StoreResult<Vec<Value>> {
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        // Storage class of the value itself, not the declared column type.
        let type_name = raw.type_info().name().to_ascii_uppercase();
        // SQLite stores booleans as integers; the declared type tells them apart.
        let declared_bool = column.type_info().name().eq_ignore_ascii_case("BOOLEAN");
        let value = match type_name.as_str() {
            "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" if declared_bool => {
                Value::Bool(row.try_get::<i64, _>(index)? != 0)
            }
            "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" => {
                Value::Int(row.try_get::<i64, _>(index)?)
            }
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => Value::Real(row.try_get::<f64, _>(index)?),
            "TEXT" | "DATETIME" | "DATE" | "TIME" => Value::Text(row.try_get::<String, _>(index)?),
            "BLOB" => Value::Bytes(row.try_get::<Vec<u8>, _>(index)?),
            other => return Err(unsupported(column.name(), other)),
        };
        values.push(value);
    }
    Ok(values)
}

pub(crate) fn pg_row(row: &PgRow) -> StoreResult<Vec<Value>> {
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(index)?)),
            "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(index)?)),
            "INT8" => Value::Int(row.try_get::<i64, _>(index)?),
            "FLOAT4" => Value::Real(f64::from(row.try_get::<f32, _>(index)?)),
            "FLOAT8" => Value::Real(row.try_get::<f64, _>(index)?),
            "BOOL" => Value::Bool(row.try_get::<bool, _>(index)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
                Value::Text(row.try_get::<String, _>(index)?)
            }
            "BYTEA" => Value::Bytes(row.try_get::<Vec<u8>, _>(index)?),
            other => return Err(unsupported(column.name(), other)),
        };
        values.push(value);
    }
    Ok(values)
}
