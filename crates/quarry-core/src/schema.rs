//! Split schema types. Pure data.
//!
//! `Metadata` is what producers and consumers exchange before any rows flow:
//! the ordered data columns plus, for key-carrying streams (local order-by
//! output), one synthetic key field per sort expression.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Parse the names accepted in pipeline documents and table definitions.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "Boolean" | "bool" | "boolean" => Ok(DataType::Boolean),
            "Int32" | "i32" | "int32" | "int" => Ok(DataType::Int32),
            "Int64" | "i64" | "int64" | "bigint" => Ok(DataType::Int64),
            "Float32" | "f32" | "float32" | "float" => Ok(DataType::Float32),
            "Float64" | "f64" | "float64" | "double" => Ok(DataType::Float64),
            "Utf8" | "utf8" | "string" | "varchar" => Ok(DataType::Utf8),
            "Binary" | "bytes" | "binary" => Ok(DataType::Binary),
            other => Err(Error::Schema(format!("unknown data type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub columns: Vec<Field>,
    /// Synthetic sort-key fields; empty for plain data streams.
    pub keys: Vec<Field>,
}

impl Metadata {
    pub fn new(columns: Vec<Field>) -> Self {
        Self {
            columns,
            keys: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.columns.get(idx)
    }

    /// Resolve a column by name. Accepts `table.column` by matching the
    /// trailing segment when no exact match exists.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|f| f.name == name)
            .or_else(|| {
                let short = name.rsplit('.').next()?;
                self.columns.iter().position(|f| f.name == short)
            })
    }

    pub fn type_of(&self, name: &str) -> Result<DataType> {
        self.index_of(name)
            .map(|i| self.columns[i].data_type)
            .ok_or_else(|| Error::Schema(format!("unknown column '{name}'")))
    }

    pub fn append_key_by_type(&mut self, data_type: DataType) {
        let name = format!("__key{}", self.keys.len());
        self.keys.push(Field::new(name, data_type));
    }

    pub fn clear_keys(&mut self) {
        self.keys.clear();
    }

    /// Same copy without key fields.
    pub fn without_keys(&self) -> Metadata {
        Metadata::new(self.columns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_fields_are_tracked_separately_from_columns() {
        let mut md = Metadata::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::Utf8),
        ]);
        md.append_key_by_type(DataType::Int64);
        md.append_key_by_type(DataType::Utf8);
        assert_eq!(md.column_count(), 2);
        assert_eq!(md.key_count(), 2);
        assert_eq!(md.keys[1].name, "__key1");

        let plain = md.without_keys();
        assert_eq!(plain.key_count(), 0);
        md.clear_keys();
        assert_eq!(md, plain);
    }

    #[test]
    fn qualified_names_resolve_to_trailing_segment() {
        let md = Metadata::new(vec![Field::new("price", DataType::Float64)]);
        assert_eq!(md.index_of("orders.price"), Some(0));
        assert_eq!(md.type_of("price").unwrap(), DataType::Float64);
        assert!(md.type_of("missing").is_err());
    }
}
