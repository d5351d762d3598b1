//! Two-phase sort.
//!
//! `OrderByLocal` buffers its whole input, evaluates the sort expressions once
//! per row into key columns, sorts stably and emits a key-carrying stream.
//! `OrderByMerge` holds one cursor per sorted input and repeatedly emits the
//! smallest head row, so equal keys keep input order (lowest input first).

use quarry_core::prelude::{Metadata, OrderType};
use quarry_plan::SortItem;
use quarry_split::{Row, Rows, Split};
use tracing::debug;

use super::{merged_input, OpStats, Operator};
use crate::error::OpError;
use crate::io::{SplitSink, SplitSource};

fn orders_of(items: &[SortItem]) -> Vec<OrderType> {
    items.iter().map(|i| i.order).collect()
}

pub struct OrderByLocal {
    pub items: Vec<SortItem>,
    /// `None` buffers without bound.
    pub limit_rows: Option<usize>,
}

impl Operator for OrderByLocal {
    fn name(&self) -> &'static str {
        "order_by_local"
    }

    fn run(
        &mut self,
        inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError> {
        let mut input = merged_input(inputs)?;
        let md = input.read_metadata()?;

        let mut out_md = md.without_keys();
        for item in &self.items {
            out_md.append_key_by_type(item.expr.data_type(&md)?);
        }
        sink.write_metadata(&out_md)?;

        let mut buffer = Split::new(out_md).with_orders(orders_of(&self.items));
        let mut stats = OpStats::default();
        while let Some(split) = input.read_split()? {
            stats.rows_in += split.num_rows() as u64;
            if let Some(limit) = self.limit_rows {
                if buffer.num_rows() + split.num_rows() > limit {
                    return Err(OpError::SortLimit { limit });
                }
            }
            for r in 0..split.num_rows() {
                let row = split.row(r);
                let keys = self
                    .items
                    .iter()
                    .map(|item| item.expr.eval(&split.metadata, &row))
                    .collect::<Result<Vec<_>, _>>()?;
                buffer.append_row_with_keys(row, keys)?;
            }
        }

        buffer.sort();
        stats.rows_out = buffer.num_rows() as u64;
        if !buffer.is_empty() {
            sink.write_split(&buffer)?;
        }
        debug!(rows = stats.rows_out, "local sort finished");
        Ok(stats)
    }
}

/// Read position inside one sorted input.
struct Cursor {
    source: Box<dyn SplitSource>,
    current: Option<Split>,
    pos: usize,
}

impl Cursor {
    fn next_row(&mut self) -> Result<Option<Row>, OpError> {
        loop {
            if let Some(split) = &mut self.current {
                if self.pos < split.num_rows() {
                    let row = split.take_row(self.pos);
                    self.pos += 1;
                    return Ok(Some(row));
                }
            }
            match self.source.read_split()? {
                Some(split) => {
                    self.current = Some(split);
                    self.pos = 0;
                }
                None => return Ok(None),
            }
        }
    }
}

pub struct OrderByMerge {
    pub items: Vec<SortItem>,
    pub batch_rows: usize,
}

impl OrderByMerge {
    fn check_input(&self, md: &Metadata) -> Result<(), OpError> {
        if md.key_count() != self.items.len() {
            return Err(OpError::Schema(format!(
                "merge expects {} sort keys, input carries {}",
                self.items.len(),
                md.key_count()
            )));
        }
        Ok(())
    }
}

impl Operator for OrderByMerge {
    fn name(&self) -> &'static str {
        "order_by_merge"
    }

    fn run(
        &mut self,
        mut inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError> {
        if inputs.is_empty() {
            return Err(OpError::Exec("merge needs at least one input".into()));
        }

        let mut in_md: Option<Metadata> = None;
        for input in inputs.iter_mut() {
            let md = input.read_metadata()?;
            self.check_input(&md)?;
            match &in_md {
                Some(first) if *first != md => {
                    return Err(OpError::Schema(format!(
                        "sorted inputs disagree on schema: {first:?} vs {md:?}"
                    )))
                }
                Some(_) => {}
                None => in_md = Some(md),
            }
        }
        let out_md = in_md
            .map(|md| md.without_keys())
            .ok_or_else(|| OpError::Exec("merge needs at least one input".into()))?;
        sink.write_metadata(&out_md)?;

        let mut cursors: Vec<Cursor> = inputs
            .into_iter()
            .map(|source| Cursor {
                source,
                current: None,
                pos: 0,
            })
            .collect();
        let mut heads = Rows::with_slots(cursors.len(), orders_of(&self.items));
        for (i, cursor) in cursors.iter_mut().enumerate() {
            heads.set(i, cursor.next_row()?);
        }

        let batch_rows = self.batch_rows.max(1);
        let mut out = Split::new(out_md.clone());
        let mut stats = OpStats::default();
        while let Some(i) = heads.min() {
            let next = cursors[i].next_row()?;
            let Some(row) = heads.set(i, next) else {
                break;
            };
            stats.rows_in += 1;
            out.append_row(row.values)?;
            if out.num_rows() >= batch_rows {
                stats.rows_out += out.num_rows() as u64;
                sink.write_split(&std::mem::replace(&mut out, Split::new(out_md.clone())))?;
            }
        }
        if !out.is_empty() {
            stats.rows_out += out.num_rows() as u64;
            sink.write_split(&out)?;
        }
        debug!(inputs = cursors.len(), rows = stats.rows_out, "merge finished");
        Ok(stats)
    }
}
