//! Columnar row batch with optional extracted sort keys.

use quarry_core::prelude::{Metadata, OrderType, Value};

use crate::error::{Result, SplitError};
use crate::order::{compare_key, Row};

/// A batch of rows sharing one `Metadata`.
///
/// `columns[c][r]` is the value of column `c` in row `r`. When the split is
/// key-carrying, `keys[k][r]` holds the evaluated `k`-th sort key of row `r`
/// and `key_flags[k][r]` records whether that key was present at all; an
/// absent key is not the same thing as a present `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub metadata: Metadata,
    pub columns: Vec<Vec<Value>>,
    pub keys: Vec<Vec<Value>>,
    pub key_flags: Vec<Vec<bool>>,
    pub orders: Vec<OrderType>,
    rows: usize,
}

impl Split {
    /// Empty split shaped after `metadata` (one key array per key field).
    pub fn new(metadata: Metadata) -> Self {
        let columns = vec![Vec::new(); metadata.column_count()];
        let keys = vec![Vec::new(); metadata.key_count()];
        let key_flags = vec![Vec::new(); metadata.key_count()];
        Self {
            metadata,
            columns,
            keys,
            key_flags,
            orders: Vec::new(),
            rows: 0,
        }
    }

    pub fn with_orders(mut self, orders: Vec<OrderType>) -> Self {
        self.orders = orders;
        self
    }

    /// Build a split from already-columnar parts; every array must have the
    /// same length.
    pub fn from_parts(
        metadata: Metadata,
        columns: Vec<Vec<Value>>,
        keys: Vec<Vec<Value>>,
        key_flags: Vec<Vec<bool>>,
    ) -> Result<Self> {
        if columns.len() != metadata.column_count() {
            return Err(SplitError::Schema(format!(
                "{} columns for metadata with {}",
                columns.len(),
                metadata.column_count()
            )));
        }
        if keys.len() != metadata.key_count() || key_flags.len() != metadata.key_count() {
            return Err(SplitError::Schema(format!(
                "{} key arrays / {} flag arrays for metadata with {} keys",
                keys.len(),
                key_flags.len(),
                metadata.key_count()
            )));
        }
        let rows = columns
            .first()
            .or(keys.first())
            .map(|c| c.len())
            .unwrap_or(0);
        let ragged = columns.iter().chain(keys.iter()).any(|c| c.len() != rows)
            || key_flags.iter().any(|f| f.len() != rows);
        if ragged {
            return Err(SplitError::Schema("ragged split arrays".into()));
        }
        Ok(Self {
            metadata,
            columns,
            keys,
            key_flags,
            orders: Vec::new(),
            rows,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Append one data row. Key arrays (if any) get absent entries.
    pub fn append_row(&mut self, row: Vec<Value>) -> Result<()> {
        let absent = vec![None; self.keys.len()];
        self.append_row_with_keys(row, absent)
    }

    /// Append one data row with its evaluated keys; `None` marks an absent key.
    pub fn append_row_with_keys(&mut self, row: Vec<Value>, keys: Vec<Option<Value>>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SplitError::Schema(format!(
                "row has {} values, split has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        if keys.len() != self.keys.len() {
            return Err(SplitError::Schema(format!(
                "row has {} keys, split has {}",
                keys.len(),
                self.keys.len()
            )));
        }
        for (col, v) in self.columns.iter_mut().zip(row) {
            col.push(v);
        }
        for (k, key) in keys.into_iter().enumerate() {
            self.key_flags[k].push(key.is_some());
            self.keys[k].push(key.unwrap_or(Value::Null));
        }
        self.rows += 1;
        Ok(())
    }

    /// Append every row of `other`, which must have the same shape.
    pub fn append(&mut self, other: &Split) -> Result<()> {
        if other.columns.len() != self.columns.len() || other.keys.len() != self.keys.len() {
            return Err(SplitError::Schema(format!(
                "cannot append split of {}+{} arrays to {}+{}",
                other.columns.len(),
                other.keys.len(),
                self.columns.len(),
                self.keys.len()
            )));
        }
        for (dst, src) in self.columns.iter_mut().zip(&other.columns) {
            dst.extend_from_slice(src);
        }
        for (dst, src) in self.keys.iter_mut().zip(&other.keys) {
            dst.extend_from_slice(src);
        }
        for (dst, src) in self.key_flags.iter_mut().zip(&other.key_flags) {
            dst.extend_from_slice(src);
        }
        self.rows += other.rows;
        Ok(())
    }

    pub fn value(&self, col: usize, row: usize) -> Option<&Value> {
        self.columns.get(col)?.get(row)
    }

    /// Copy of row `row`'s data values.
    pub fn row(&self, row: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[row].clone()).collect()
    }

    /// Copy of row `row`'s key values and present flags.
    pub fn key_row(&self, row: usize) -> (Vec<Value>, Vec<bool>) {
        (
            self.keys.iter().map(|k| k[row].clone()).collect(),
            self.key_flags.iter().map(|f| f[row]).collect(),
        )
    }

    /// Move row `row` out as a detached `Row`, leaving `Null`s behind. For
    /// readers that visit each row once.
    pub fn take_row(&mut self, row: usize) -> Row {
        let take = |col: &mut Vec<Value>| std::mem::replace(&mut col[row], Value::Null);
        Row::new(
            self.columns.iter_mut().map(take).collect(),
            self.keys.iter_mut().map(take).collect(),
            self.key_flags.iter().map(|f| f[row]).collect(),
        )
    }

    /// Stable in-place sort by the recorded keys and `orders`.
    pub fn sort(&mut self) {
        if self.rows < 2 || self.keys.is_empty() {
            return;
        }
        let mut perm: Vec<usize> = (0..self.rows).collect();
        perm.sort_by(|&a, &b| self.compare_rows(a, b));
        self.permute(&perm);
    }

    /// Same order as `compare_keys` over two `key_row`s, read in place.
    pub fn compare_rows(&self, a: usize, b: usize) -> std::cmp::Ordering {
        for (k, order) in self.orders.iter().enumerate() {
            let ord = compare_key(self.key_cell(k, a), self.key_cell(k, b), *order);
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    }

    fn key_cell(&self, k: usize, row: usize) -> Option<&Value> {
        match self.key_flags.get(k).and_then(|f| f.get(row)) {
            Some(true) => self.keys.get(k).and_then(|col| col.get(row)),
            _ => None,
        }
    }

    fn permute(&mut self, perm: &[usize]) {
        for col in self.columns.iter_mut().chain(self.keys.iter_mut()) {
            let original = std::mem::take(col);
            *col = perm.iter().map(|&i| original[i].clone()).collect();
        }
        for flags in &mut self.key_flags {
            let original = std::mem::take(flags);
            *flags = perm.iter().map(|&i| original[i]).collect();
        }
    }

    /// Rows `[start, end)` as a new split of the same shape.
    pub fn slice(&self, start: usize, end: usize) -> Split {
        let end = end.min(self.rows);
        let start = start.min(end);
        Split {
            metadata: self.metadata.clone(),
            columns: self.columns.iter().map(|c| c[start..end].to_vec()).collect(),
            keys: self.keys.iter().map(|c| c[start..end].to_vec()).collect(),
            key_flags: self.key_flags.iter().map(|c| c[start..end].to_vec()).collect(),
            orders: self.orders.clone(),
            rows: end - start,
        }
    }

    /// Same rows with key arrays and key fields dropped.
    pub fn without_keys(&self) -> Split {
        Split {
            metadata: self.metadata.without_keys(),
            columns: self.columns.clone(),
            keys: Vec::new(),
            key_flags: Vec::new(),
            orders: Vec::new(),
            rows: self.rows,
        }
    }
}
