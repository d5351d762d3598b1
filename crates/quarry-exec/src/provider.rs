//! Table providers: where scan nodes get their rows from.
//!
//! A provider decodes one stored partition of a table into splits typed by the
//! `Metadata` the scan node carries. Columns are matched by name, so a stored
//! table may hold more columns than a scan asks for.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use quarry_core::prelude::{Metadata, Value};
use quarry_split::Split;

use crate::error::OpError;

pub trait TableProvider: Send + Sync {
    fn partition_count(&self, catalog: &str, schema: &str, table: &str) -> Result<usize, OpError>;

    fn scan(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        partition: usize,
        metadata: &Metadata,
    ) -> Result<Vec<Split>, OpError>;
}

type TableKey = (String, String, String);

fn key(catalog: &str, schema: &str, table: &str) -> TableKey {
    (catalog.to_string(), schema.to_string(), table.to_string())
}

/// Tables held in memory, one `Vec<Split>` per partition.
#[derive(Default)]
pub struct MemoryTableProvider {
    tables: RwLock<HashMap<TableKey, Vec<Vec<Split>>>>,
}

impl MemoryTableProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a table; `partitions[i]` holds partition `i`.
    pub fn insert_table(&self, catalog: &str, schema: &str, table: &str, partitions: Vec<Vec<Split>>) {
        self.tables
            .write()
            .insert(key(catalog, schema, table), partitions);
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

impl TableProvider for MemoryTableProvider {
    fn partition_count(&self, catalog: &str, schema: &str, table: &str) -> Result<usize, OpError> {
        self.tables
            .read()
            .get(&key(catalog, schema, table))
            .map(|p| p.len())
            .ok_or_else(|| OpError::Provider(format!("no table {catalog}.{schema}.{table}")))
    }

    fn scan(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        partition: usize,
        metadata: &Metadata,
    ) -> Result<Vec<Split>, OpError> {
        let tables = self.tables.read();
        let parts = tables
            .get(&key(catalog, schema, table))
            .ok_or_else(|| OpError::Provider(format!("no table {catalog}.{schema}.{table}")))?;
        let Some(splits) = parts.get(partition) else {
            return Err(OpError::Provider(format!(
                "{table} has {} partitions, asked for {partition}",
                parts.len()
            )));
        };
        splits.iter().map(|s| select_columns(s, metadata)).collect()
    }
}

/// Re-shape a stored split to `metadata`, picking columns by name.
fn select_columns(stored: &Split, metadata: &Metadata) -> Result<Split, OpError> {
    let mut columns = Vec::with_capacity(metadata.column_count());
    for field in &metadata.columns {
        let idx = stored.metadata.index_of(&field.name).ok_or_else(|| {
            OpError::Schema(format!("stored table has no column '{}'", field.name))
        })?;
        columns.push(stored.columns[idx].clone());
    }
    Ok(Split::from_parts(metadata.without_keys(), columns, Vec::new(), Vec::new())?)
}

/// Csv files laid out as `<root>/<catalog>/<schema>/<table>/part-<n>.csv`,
/// each with a header row.
pub struct CsvTableProvider {
    root: PathBuf,
    batch_rows: usize,
}

impl CsvTableProvider {
    pub fn new(root: impl Into<PathBuf>, batch_rows: usize) -> Self {
        Self {
            root: root.into(),
            batch_rows: batch_rows.max(1),
        }
    }

    pub fn table_dir(&self, catalog: &str, schema: &str, table: &str) -> PathBuf {
        self.root.join(catalog).join(schema).join(table)
    }

    pub fn partition_path(&self, catalog: &str, schema: &str, table: &str, partition: usize) -> PathBuf {
        self.table_dir(catalog, schema, table)
            .join(format!("part-{partition}.csv"))
    }

    fn read_partition(&self, path: &Path, metadata: &Metadata) -> Result<Vec<Split>, OpError> {
        let file = File::open(path)
            .map_err(|e| OpError::Provider(format!("open {}: {e}", path.display())))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| OpError::Provider(format!("{}: {e}", path.display())))?
            .clone();
        let positions = metadata
            .columns
            .iter()
            .map(|f| {
                headers.iter().position(|h| h.trim() == f.name).ok_or_else(|| {
                    OpError::Schema(format!("{} has no column '{}'", path.display(), f.name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let out_md = metadata.without_keys();
        let mut splits = Vec::new();
        let mut current = Split::new(out_md.clone());
        for record in reader.records() {
            let record = record.map_err(|e| OpError::Provider(format!("{}: {e}", path.display())))?;
            let mut row = Vec::with_capacity(positions.len());
            for (field, &pos) in out_md.columns.iter().zip(&positions) {
                let cell = record.get(pos).unwrap_or("");
                row.push(Value::parse(cell, field.data_type)?);
            }
            current.append_row(row)?;
            if current.num_rows() >= self.batch_rows {
                splits.push(std::mem::replace(&mut current, Split::new(out_md.clone())));
            }
        }
        if !current.is_empty() {
            splits.push(current);
        }
        Ok(splits)
    }
}

impl TableProvider for CsvTableProvider {
    fn partition_count(&self, catalog: &str, schema: &str, table: &str) -> Result<usize, OpError> {
        let dir = self.table_dir(catalog, schema, table);
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| OpError::Provider(format!("{}: {e}", dir.display())))?;
        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| OpError::Provider(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("part-") && name.ends_with(".csv") {
                count += 1;
            }
        }
        Ok(count)
    }

    fn scan(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        partition: usize,
        metadata: &Metadata,
    ) -> Result<Vec<Split>, OpError> {
        let path = self.partition_path(catalog, schema, table, partition);
        self.read_partition(&path, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::prelude::{DataType, Field};

    fn people() -> Metadata {
        Metadata::new(vec![
            Field::new("name", DataType::Utf8),
            Field::new("age", DataType::Int32),
        ])
    }

    #[test]
    fn csv_partitions_are_typed_and_batched() {
        let root = tempfile::tempdir().unwrap();
        let provider = CsvTableProvider::new(root.path(), 2);
        let dir = provider.table_dir("main", "public", "people");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("part-0.csv"), "age,name,city\n30,ann,x\n,bob,y\n41,cy,z\n").unwrap();
        std::fs::write(dir.join("part-1.csv"), "name,age\n").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        assert_eq!(provider.partition_count("main", "public", "people").unwrap(), 2);

        let splits = provider.scan("main", "public", "people", 0, &people()).unwrap();
        assert_eq!(splits.iter().map(Split::num_rows).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(splits[0].row(0), vec![Value::Str("ann".into()), Value::I32(30)]);
        assert_eq!(splits[0].row(1), vec![Value::Str("bob".into()), Value::Null]);

        assert!(provider.scan("main", "public", "people", 1, &people()).unwrap().is_empty());
        assert!(provider.scan("main", "public", "people", 7, &people()).is_err());
    }

    #[test]
    fn csv_type_errors_surface() {
        let root = tempfile::tempdir().unwrap();
        let provider = CsvTableProvider::new(root.path(), 10);
        let path = provider.partition_path("c", "s", "t", 0);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "name,age\nann,old\n").unwrap();
        assert!(provider.scan("c", "s", "t", 0, &people()).is_err());
    }

    #[test]
    fn memory_tables_project_by_name() {
        let stored_md = Metadata::new(vec![
            Field::new("age", DataType::Int32),
            Field::new("name", DataType::Utf8),
        ]);
        let mut split = Split::new(stored_md);
        split
            .append_row(vec![Value::I32(5), Value::Str("eve".into())])
            .unwrap();

        let provider = MemoryTableProvider::new();
        provider.insert_table("c", "s", "t", vec![vec![split], vec![]]);
        assert_eq!(provider.partition_count("c", "s", "t").unwrap(), 2);

        let got = provider.scan("c", "s", "t", 0, &people()).unwrap();
        assert_eq!(got[0].row(0), vec![Value::Str("eve".into()), Value::I32(5)]);
        assert!(provider.scan("c", "s", "t", 2, &people()).is_err());
        assert!(provider.partition_count("c", "s", "nope").is_err());
    }
}
