//! Reference row codec.
//!
//! Rows are stored as a JSON array of values in schema column order. Encoding
//! validates every value against its column the way the storage row writer
//! does, reporting the first violation as a `WriteResult`.

use anyhow::{ensure, Context, Result};

use crate::env::RowCodec;
use crate::error::WriteResult;
use crate::types::{ColumnDef, PropertyType, Schema, Value};

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRowCodec;

impl JsonRowCodec {
    fn check_value(col: &ColumnDef, value: &Value) -> Result<Value, WriteResult> {
        if value.is_null() {
            if col.nullable {
                return Ok(Value::Null);
            }
            return Err(WriteResult::NotNullable);
        }
        let checked = match (col.ty, value) {
            (PropertyType::Bool, Value::Bool(_)) => value.clone(),
            (PropertyType::Int8, Value::Int(v)) => checked_int(*v, i8::MIN.into(), i8::MAX.into())?,
            (PropertyType::Int16, Value::Int(v)) => {
                checked_int(*v, i16::MIN.into(), i16::MAX.into())?
            }
            (PropertyType::Int32, Value::Int(v)) => {
                checked_int(*v, i32::MIN.into(), i32::MAX.into())?
            }
            (PropertyType::Int64 | PropertyType::Timestamp, Value::Int(_)) => value.clone(),
            (PropertyType::Double, Value::Float(_)) => value.clone(),
            (PropertyType::Double, Value::Int(v)) => Value::Float(*v as f64),
            (PropertyType::String, Value::Str(_)) => value.clone(),
            _ => return Err(WriteResult::TypeMismatch),
        };
        Ok(checked)
    }
}

fn checked_int(value: i64, min: i64, max: i64) -> Result<Value, WriteResult> {
    if value < min || value > max {
        return Err(WriteResult::OutOfRange);
    }
    Ok(Value::Int(value))
}

impl RowCodec for JsonRowCodec {
    fn encode(
        &self,
        schema: &Schema,
        prop_names: &[String],
        props: &[Value],
    ) -> Result<Vec<u8>, WriteResult> {
        let mut slots: Vec<Option<Value>> = vec![None; schema.columns.len()];
        if prop_names.is_empty() {
            if props.len() > schema.columns.len() {
                return Err(WriteResult::UnknownField);
            }
            for (idx, value) in props.iter().enumerate() {
                slots[idx] = Some(Self::check_value(&schema.columns[idx], value)?);
            }
        } else {
            if prop_names.len() != props.len() {
                return Err(WriteResult::IncorrectValue);
            }
            for (name, value) in prop_names.iter().zip(props) {
                let Some((idx, col)) = schema.field(name) else {
                    return Err(WriteResult::UnknownField);
                };
                slots[idx] = Some(Self::check_value(col, value)?);
            }
        }

        let mut row = Vec::with_capacity(slots.len());
        for (col, slot) in schema.columns.iter().zip(slots) {
            let value = match (slot, &col.default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) if col.nullable => Value::Null,
                (None, None) => return Err(WriteResult::FieldUnset),
            };
            row.push(value);
        }
        serde_json::to_vec(&row).map_err(|_| WriteResult::IncorrectValue)
    }

    fn decode(&self, schema: &Schema, bytes: &[u8]) -> Result<Vec<Value>> {
        let row: Vec<Value> = serde_json::from_slice(bytes).context("decode stored row")?;
        ensure!(
            row.len() == schema.columns.len(),
            "stored row has {} values, schema has {} columns",
            row.len(),
            schema.columns.len()
        );
        Ok(row)
    }
}
