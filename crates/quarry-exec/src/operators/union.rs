use super::{merged_input, OpStats, Operator};
use crate::error::OpError;
use crate::io::{SplitSink, SplitSource};

/// Concatenate every input in arrival order. Inputs must share one schema.
pub struct Union;

impl Operator for Union {
    fn name(&self) -> &'static str {
        "union"
    }

    fn run(
        &mut self,
        inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError> {
        let mut input = merged_input(inputs)?;
        let md = input.read_metadata()?;
        sink.write_metadata(&md)?;

        let mut stats = OpStats::default();
        while let Some(split) = input.read_split()? {
            stats.rows_in += split.num_rows() as u64;
            stats.rows_out += split.num_rows() as u64;
            sink.write_split(&split)?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_support::{rows, run_collect, source};
    use quarry_core::prelude::{DataType, Field, Metadata, Value};

    #[test]
    fn concatenates_all_inputs() {
        let md = Metadata::new(vec![Field::new("v", DataType::Int32)]);
        let one = |v: i32| vec![vec![Value::I32(v)]];
        let inputs = vec![
            source(&md, vec![one(1), one(2)]),
            source(&md, vec![one(3)]),
            source(&md, vec![]),
        ];
        let out = run_collect(&mut Union, inputs);
        let mut got: Vec<_> = rows(&out).into_iter().flatten().collect();
        got.sort_by(|a, b| a.cmp_natural(b));
        assert_eq!(got, vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let a = Metadata::new(vec![Field::new("v", DataType::Int32)]);
        let b = Metadata::new(vec![Field::new("v", DataType::Utf8)]);
        let mut sink = crate::io::CollectSink::new();
        let res = Union.run(vec![source(&a, vec![]), source(&b, vec![])], &mut sink);
        assert!(matches!(res, Err(OpError::Schema(_))));
    }
}
