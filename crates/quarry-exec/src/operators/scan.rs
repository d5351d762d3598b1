use std::sync::Arc;

use quarry_core::prelude::Metadata;
use quarry_plan::Expr;
use tracing::debug;

use super::filter::filter_split;
use super::{OpStats, Operator};
use crate::error::OpError;
use crate::io::{SplitSink, SplitSource};
use crate::provider::TableProvider;

/// Reads the assigned partitions of a table and applies pushed-down filters.
pub struct Scan {
    pub provider: Arc<dyn TableProvider>,
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub partitions: Vec<usize>,
    pub metadata: Metadata,
    pub filters: Vec<Expr>,
}

impl Operator for Scan {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn run(
        &mut self,
        inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError> {
        if !inputs.is_empty() {
            return Err(OpError::Exec(format!("scan takes no inputs, got {}", inputs.len())));
        }
        let md = self.metadata.without_keys();
        sink.write_metadata(&md)?;

        let mut stats = OpStats::default();
        for &partition in &self.partitions {
            let splits = self.provider.scan(
                &self.catalog,
                &self.schema,
                &self.table,
                partition,
                &md,
            )?;
            for split in splits {
                stats.rows_in += split.num_rows() as u64;
                let out = if self.filters.is_empty() {
                    split
                } else {
                    filter_split(&split, &self.filters)?
                };
                if !out.is_empty() {
                    stats.rows_out += out.num_rows() as u64;
                    sink.write_split(&out)?;
                }
            }
        }
        debug!(table = %self.table, partitions = ?self.partitions, rows = stats.rows_out, "scan finished");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_support::{rows, run_collect, split_of};
    use crate::provider::MemoryTableProvider;
    use quarry_core::prelude::{DataType, Field, Value};

    #[test]
    fn reads_assigned_partitions_and_filters() {
        let md = Metadata::new(vec![Field::new("n", DataType::Int64)]);
        let part = |vals: &[i64]| vec![split_of(&md, vals.iter().map(|v| vec![Value::I64(*v)]).collect())];
        let provider = MemoryTableProvider::new();
        provider.insert_table("c", "s", "t", vec![part(&[1, 2]), part(&[3, 4]), part(&[5, 6])]);

        let mut scan = Scan {
            provider: Arc::new(provider),
            catalog: "c".into(),
            schema: "s".into(),
            table: "t".into(),
            partitions: vec![0, 2],
            metadata: md.clone(),
            filters: vec![Expr::parse("n != 5").unwrap()],
        };
        let out = run_collect(&mut scan, vec![]);
        assert_eq!(
            rows(&out),
            vec![vec![Value::I64(1)], vec![Value::I64(2)], vec![Value::I64(6)]]
        );
    }
}
