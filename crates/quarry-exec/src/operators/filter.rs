use quarry_core::prelude::{Field, Metadata, Value};
use quarry_plan::{Expr, NamedExpr};
use quarry_split::Split;

use super::{merged_input, OpStats, Operator};
use crate::error::OpError;
use crate::io::{SplitSink, SplitSource};

/// Rows of `split` for which every predicate holds. Key arrays are carried.
pub(crate) fn filter_split(split: &Split, predicates: &[Expr]) -> Result<Split, OpError> {
    let md = &split.metadata;
    let mut out = Split::new(md.clone()).with_orders(split.orders.clone());
    for r in 0..split.num_rows() {
        let row = split.row(r);
        let mut keep = true;
        for p in predicates {
            if !p.eval_predicate(md, &row)? {
                keep = false;
                break;
            }
        }
        if keep {
            let (keys, flags) = split.key_row(r);
            let keys = keys.into_iter().zip(flags).map(|(k, f)| f.then_some(k)).collect();
            out.append_row_with_keys(row, keys)?;
        }
    }
    Ok(out)
}

pub struct Filter {
    pub predicate: Expr,
}

impl Operator for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn run(
        &mut self,
        inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError> {
        let mut input = merged_input(inputs)?;
        let md = input.read_metadata()?;
        self.predicate.data_type(&md)?;
        sink.write_metadata(&md)?;

        let mut stats = OpStats::default();
        let predicates = std::slice::from_ref(&self.predicate);
        while let Some(split) = input.read_split()? {
            stats.rows_in += split.num_rows() as u64;
            let out = filter_split(&split, predicates)?;
            if !out.is_empty() {
                stats.rows_out += out.num_rows() as u64;
                sink.write_split(&out)?;
            }
        }
        Ok(stats)
    }
}

/// Evaluates one expression per output column. Absent values become `Null`.
pub struct Projection {
    pub exprs: Vec<NamedExpr>,
}

impl Operator for Projection {
    fn name(&self) -> &'static str {
        "projection"
    }

    fn run(
        &mut self,
        inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError> {
        let mut input = merged_input(inputs)?;
        let in_md = input.read_metadata()?;
        let mut fields = Vec::with_capacity(self.exprs.len());
        for e in &self.exprs {
            fields.push(Field::new(e.name.clone(), e.expr.data_type(&in_md)?));
        }
        let out_md = Metadata::new(fields);
        sink.write_metadata(&out_md)?;

        let mut stats = OpStats::default();
        while let Some(split) = input.read_split()? {
            let mut out = Split::new(out_md.clone());
            for r in 0..split.num_rows() {
                let row = split.row(r);
                let mut values = Vec::with_capacity(self.exprs.len());
                for e in &self.exprs {
                    values.push(e.expr.eval(&in_md, &row)?.unwrap_or(Value::Null));
                }
                out.append_row(values)?;
            }
            stats.rows_in += split.num_rows() as u64;
            stats.rows_out += out.num_rows() as u64;
            sink.write_split(&out)?;
        }
        Ok(stats)
    }
}
