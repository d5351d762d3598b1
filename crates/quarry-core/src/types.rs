//! Row values and their natural ordering.
//!
//! Splits are columnar `Vec<Value>`s; this keeps the wire format and the
//! operators simple while still being typed per column by `Metadata`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

/// Sort direction for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    Asc,
    Desc,
}

impl Value {
    /// `None` for `Null`, which carries no type of its own.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Boolean),
            Value::I32(_) => Some(DataType::Int32),
            Value::I64(_) => Some(DataType::Int64),
            Value::F32(_) => Some(DataType::Float32),
            Value::F64(_) => Some(DataType::Float64),
            Value::Str(_) => Some(DataType::Utf8),
            Value::Bin(_) => Some(DataType::Binary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Parse a textual cell into a value of `data_type`. Empty text is `Null`.
    pub fn parse(text: &str, data_type: DataType) -> Result<Value> {
        if text.is_empty() {
            return Ok(Value::Null);
        }
        let bad = |e: &dyn fmt::Display| Error::Type(format!("'{text}' as {data_type:?}: {e}"));
        Ok(match data_type {
            DataType::Boolean => Value::Bool(text.trim().parse::<bool>().map_err(|e| bad(&e))?),
            DataType::Int32 => Value::I32(text.trim().parse::<i32>().map_err(|e| bad(&e))?),
            DataType::Int64 => Value::I64(text.trim().parse::<i64>().map_err(|e| bad(&e))?),
            DataType::Float32 => Value::F32(text.trim().parse::<f32>().map_err(|e| bad(&e))?),
            DataType::Float64 => Value::F64(text.trim().parse::<f64>().map_err(|e| bad(&e))?),
            DataType::Utf8 => Value::Str(text.to_string()),
            DataType::Binary => Value::Bin(text.as_bytes().to_vec()),
        })
    }

    /// Natural ordering: nulls first, numbers compared numerically across
    /// widths, NaN after every other float, mixed types by variant rank.
    pub fn cmp_natural(&self, other: &Value) -> Ordering {
        use Value::*;

        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(x), Bool(y)) => x.cmp(y),
            (Str(x), Str(y)) => x.cmp(y),
            (Bin(x), Bin(y)) => x.cmp(y),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => cmp_f64(x, y),
                    _ => type_rank(a).cmp(&type_rank(b)),
                },
            },
        }
    }

    /// Stable byte encoding used for grouping and hash partitioning.
    /// Integers of both widths encode identically so `I32(1)` and `I64(1)`
    /// land in the same group.
    pub fn write_key_bytes(&self, out: &mut Vec<u8>) {
        use Value::*;

        match self {
            Null => out.push(0),
            Bool(b) => {
                out.push(1);
                out.push(*b as u8);
            }
            I32(_) | I64(_) => {
                out.push(2);
                out.extend_from_slice(&self.as_i64().unwrap_or_default().to_le_bytes());
            }
            F32(_) | F64(_) => {
                out.push(4);
                out.extend_from_slice(&self.as_f64().unwrap_or_default().to_bits().to_le_bytes());
            }
            Str(s) => {
                out.push(6);
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Bin(b) => {
                out.push(7);
                out.extend_from_slice(&(b.len() as u64).to_le_bytes());
                out.extend_from_slice(b);
            }
        }
    }

    /// Hash a value into a blake3 hasher (type discriminant first).
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        let mut buf = Vec::with_capacity(16);
        self.write_key_bytes(&mut buf);
        hasher.update(&buf);
    }
}

fn cmp_f64(x: f64, y: f64) -> Ordering {
    if x.is_nan() && y.is_nan() {
        Ordering::Equal
    } else if x.is_nan() {
        Ordering::Greater
    } else if y.is_nan() {
        Ordering::Less
    } else {
        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
}

/// Numeric order of value variants for mixed-type comparisons.
fn type_rank(v: &Value) -> u8 {
    use Value::*;
    match v {
        Null => 0,
        Bool(_) => 1,
        I32(_) => 2,
        I64(_) => 3,
        F32(_) => 4,
        F64(_) => 5,
        Str(_) => 6,
        Bin(_) => 7,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bin(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}
