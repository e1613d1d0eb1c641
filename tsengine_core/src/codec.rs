//! Canonical encode/decode of typed tag and field cells.
//!
//! Encoding never coerces between types: an unknown or mismatched type is a
//! schema error (`Error::SchemaMismatch`), not a silent conversion.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// The type tag carried alongside every encoded cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Int64,
    Float64,
    Str,
    BinaryData,
    Int64Arr,
    StrArr,
}

/// A typed value as seen at the ingest API boundary, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Str(String),
    BinaryData(Vec<u8>),
    Int64Arr(Vec<i64>),
    StrArr(Vec<String>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int64(_) => ValueType::Int64,
            Value::Float64(_) => ValueType::Float64,
            Value::Str(_) => ValueType::Str,
            Value::BinaryData(_) => ValueType::BinaryData,
            Value::Int64Arr(_) => ValueType::Int64Arr,
            Value::StrArr(_) => ValueType::StrArr,
        }
    }
}

/// An encoded tag/field cell. `value` carries a scalar's canonical bytes;
/// `value_arr` carries one canonical encoding per element of an array type.
/// Null is `value == None && value_arr == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value_type: ValueType,
    pub value: Option<Vec<u8>>,
    pub value_arr: Option<Vec<Vec<u8>>>,
}

impl NameValue {
    pub fn null(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            value: None,
            value_arr: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none() && self.value_arr.is_none()
    }
}

/// Encodes a typed value to its canonical byte representation.
pub fn encode(value: &Value) -> (ValueType, Option<Vec<u8>>, Option<Vec<Vec<u8>>>) {
    match value {
        Value::Int64(v) => (ValueType::Int64, Some(v.to_be_bytes().to_vec()), None),
        Value::Float64(v) => (ValueType::Float64, Some(v.to_be_bytes().to_vec()), None),
        Value::Str(v) => (ValueType::Str, Some(v.as_bytes().to_vec()), None),
        // Defensive clone: callers may reuse or drop the source buffer immediately.
        Value::BinaryData(v) => (ValueType::BinaryData, Some(v.clone()), None),
        Value::Int64Arr(vs) => (
            ValueType::Int64Arr,
            None,
            Some(vs.iter().map(|v| v.to_be_bytes().to_vec()).collect()),
        ),
        Value::StrArr(vs) => (
            ValueType::StrArr,
            None,
            Some(vs.iter().map(|v| v.as_bytes().to_vec()).collect()),
        ),
    }
}

/// Encodes a value into a [`NameValue`] cell under the given name.
pub fn encode_named(name: impl Into<String>, value: &Value) -> NameValue {
    let (value_type, value, value_arr) = encode(value);
    NameValue {
        name: name.into(),
        value_type,
        value,
        value_arr,
    }
}

/// Decodes a [`NameValue`] cell back to a typed [`Value`]. Returns `Ok(None)` for a null cell.
pub fn decode(cell: &NameValue) -> Result<Option<Value>> {
    if cell.is_null() {
        return Ok(None);
    }
    let decoded = match cell.value_type {
        ValueType::Int64 => {
            let bytes = cell.value.as_deref().ok_or_else(|| schema_mismatch(cell))?;
            Value::Int64(i64::from_be_bytes(
                bytes.try_into().map_err(|_| schema_mismatch(cell))?,
            ))
        }
        ValueType::Float64 => {
            let bytes = cell.value.as_deref().ok_or_else(|| schema_mismatch(cell))?;
            Value::Float64(f64::from_be_bytes(
                bytes.try_into().map_err(|_| schema_mismatch(cell))?,
            ))
        }
        ValueType::Str => {
            let bytes = cell.value.as_deref().ok_or_else(|| schema_mismatch(cell))?;
            Value::Str(String::from_utf8(bytes.to_vec()).map_err(|_| schema_mismatch(cell))?)
        }
        ValueType::BinaryData => {
            let bytes = cell.value.as_deref().ok_or_else(|| schema_mismatch(cell))?;
            Value::BinaryData(bytes.to_vec())
        }
        ValueType::Int64Arr => {
            let arr = cell.value_arr.as_ref().ok_or_else(|| schema_mismatch(cell))?;
            let mut out = Vec::with_capacity(arr.len());
            for elem in arr {
                out.push(i64::from_be_bytes(
                    elem.as_slice().try_into().map_err(|_| schema_mismatch(cell))?,
                ));
            }
            Value::Int64Arr(out)
        }
        ValueType::StrArr => {
            let arr = cell.value_arr.as_ref().ok_or_else(|| schema_mismatch(cell))?;
            let mut out = Vec::with_capacity(arr.len());
            for elem in arr {
                out.push(String::from_utf8(elem.clone()).map_err(|_| schema_mismatch(cell))?);
            }
            Value::StrArr(out)
        }
    };
    Ok(Some(decoded))
}

fn schema_mismatch(cell: &NameValue) -> Error {
    Error::SchemaMismatch(format!(
        "cannot decode column {:?} as {:?}",
        cell.name, cell.value_type
    ))
}
