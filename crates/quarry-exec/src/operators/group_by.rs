//! Hash aggregation.
//!
//! Upstream routes rows by a hash of the group keys, so every group is owned
//! by exactly one worker and each worker emits final (not partial) values.
//! A worker that saw no rows emits nothing, except the one flagged with
//! `empty_row`: for a key-less aggregation it emits the single row
//! (`count` 0, every other aggregate null).

use std::collections::HashMap;

use quarry_core::prelude::{DataType, Field, Metadata, Value};
use quarry_plan::{AggExpr, AggFunc};
use quarry_split::Split;
use tracing::debug;

use super::{merged_input, OpStats, Operator};
use crate::error::OpError;
use crate::io::{SplitSink, SplitSource};

#[derive(Debug, Clone)]
enum Acc {
    Count(i64),
    SumInt(Option<i64>),
    SumFloat(Option<f64>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, n: i64 },
}

impl Acc {
    fn new(func: AggFunc, out: DataType) -> Self {
        match func {
            AggFunc::Count => Acc::Count(0),
            AggFunc::Sum if out.is_float() => Acc::SumFloat(None),
            AggFunc::Sum => Acc::SumInt(None),
            AggFunc::Min => Acc::Min(None),
            AggFunc::Max => Acc::Max(None),
            AggFunc::Avg => Acc::Avg { sum: 0.0, n: 0 },
        }
    }

    /// `v` is `None` for `count(*)`. Nulls are skipped by every aggregate.
    fn update(&mut self, v: Option<&Value>) -> Result<(), OpError> {
        if let Acc::Count(n) = self {
            if v.map_or(true, |v| !v.is_null()) {
                *n += 1;
            }
            return Ok(());
        }
        let Some(v) = v.filter(|v| !v.is_null()) else {
            return Ok(());
        };
        match self {
            Acc::Count(_) => {}
            Acc::SumInt(s) => {
                let x = v
                    .as_i64()
                    .ok_or_else(|| OpError::Arithmetic(format!("sum over {v:?}")))?;
                let next = s.unwrap_or(0).checked_add(x).ok_or_else(|| {
                    OpError::Arithmetic("integer overflow in sum".into())
                })?;
                *s = Some(next);
            }
            Acc::SumFloat(s) => {
                let x = v
                    .as_f64()
                    .ok_or_else(|| OpError::Arithmetic(format!("sum over {v:?}")))?;
                *s = Some(s.unwrap_or(0.0) + x);
            }
            Acc::Min(m) => {
                if m.as_ref().map_or(true, |cur| v.cmp_natural(cur).is_lt()) {
                    *m = Some(v.clone());
                }
            }
            Acc::Max(m) => {
                if m.as_ref().map_or(true, |cur| v.cmp_natural(cur).is_gt()) {
                    *m = Some(v.clone());
                }
            }
            Acc::Avg { sum, n } => {
                *sum += v
                    .as_f64()
                    .ok_or_else(|| OpError::Arithmetic(format!("avg over {v:?}")))?;
                *n += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Acc::Count(n) => Value::I64(n),
            Acc::SumInt(s) => s.map(Value::I64).unwrap_or(Value::Null),
            Acc::SumFloat(s) => s.map(Value::F64).unwrap_or(Value::Null),
            Acc::Min(m) | Acc::Max(m) => m.unwrap_or(Value::Null),
            Acc::Avg { n: 0, .. } => Value::Null,
            Acc::Avg { sum, n } => Value::F64(sum / n as f64),
        }
    }
}

struct Group {
    keys: Vec<Value>,
    accs: Vec<Acc>,
}

pub struct GroupBy {
    pub keys: Vec<String>,
    pub aggs: Vec<AggExpr>,
    batch_rows: usize,
    empty_row: bool,
}

impl GroupBy {
    pub fn new(keys: Vec<String>, aggs: Vec<AggExpr>, batch_rows: usize) -> Self {
        Self {
            keys,
            aggs,
            batch_rows: batch_rows.max(1),
            empty_row: false,
        }
    }

    /// Emit the aggregate row of an empty key-less input. Ignored when
    /// grouping by keys.
    pub fn with_empty_row(mut self, on: bool) -> Self {
        self.empty_row = on;
        self
    }

    fn new_accs(&self, out_types: &[DataType]) -> Vec<Acc> {
        self.aggs
            .iter()
            .zip(out_types)
            .map(|(a, t)| Acc::new(a.func, *t))
            .collect()
    }
}

impl Operator for GroupBy {
    fn name(&self) -> &'static str {
        "group_by"
    }

    fn run(
        &mut self,
        inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError> {
        let mut input = merged_input(inputs)?;
        let in_md = input.read_metadata()?;

        let key_idx = self
            .keys
            .iter()
            .map(|k| {
                in_md
                    .index_of(k)
                    .ok_or_else(|| OpError::Schema(format!("group key '{k}' not in input")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let agg_idx = self
            .aggs
            .iter()
            .map(|a| match &a.column {
                Some(c) => in_md
                    .index_of(c)
                    .map(Some)
                    .ok_or_else(|| OpError::Schema(format!("aggregate column '{c}' not in input"))),
                None => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields = Vec::with_capacity(key_idx.len() + self.aggs.len());
        for (name, &i) in self.keys.iter().zip(&key_idx) {
            fields.push(Field::new(name.clone(), in_md.columns[i].data_type));
        }
        let mut out_types = Vec::with_capacity(self.aggs.len());
        for a in &self.aggs {
            let t = a.output_type(&in_md)?;
            out_types.push(t);
            fields.push(Field::new(a.alias.clone(), t));
        }
        let out_md = Metadata::new(fields);
        sink.write_metadata(&out_md)?;

        let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut groups: Vec<Group> = Vec::new();
        let mut stats = OpStats::default();
        let mut key_buf = Vec::new();

        while let Some(split) = input.read_split()? {
            stats.rows_in += split.num_rows() as u64;
            for r in 0..split.num_rows() {
                key_buf.clear();
                for &i in &key_idx {
                    split.columns[i][r].write_key_bytes(&mut key_buf);
                }
                let g = match index.get(&key_buf) {
                    Some(&g) => g,
                    None => {
                        groups.push(Group {
                            keys: key_idx.iter().map(|&i| split.columns[i][r].clone()).collect(),
                            accs: self.new_accs(&out_types),
                        });
                        index.insert(key_buf.clone(), groups.len() - 1);
                        groups.len() - 1
                    }
                };
                for (acc, col) in groups[g].accs.iter_mut().zip(&agg_idx) {
                    acc.update(col.map(|c| &split.columns[c][r]))?;
                }
            }
        }

        if groups.is_empty() && self.keys.is_empty() && self.empty_row {
            groups.push(Group {
                keys: Vec::new(),
                accs: self.new_accs(&out_types),
            });
        }

        let group_count = groups.len();
        let mut out = Split::new(out_md.clone());
        for group in groups {
            let mut row = group.keys;
            row.extend(group.accs.into_iter().map(Acc::finish));
            out.append_row(row)?;
            if out.num_rows() >= self.batch_rows {
                stats.rows_out += out.num_rows() as u64;
                sink.write_split(&std::mem::replace(&mut out, Split::new(out_md.clone())))?;
            }
        }
        if !out.is_empty() {
            stats.rows_out += out.num_rows() as u64;
            sink.write_split(&out)?;
        }
        debug!(groups = group_count, rows_in = stats.rows_in, "group by finished");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_support::{rows, run_collect, source};

    fn md() -> Metadata {
        Metadata::new(vec![
            Field::new("region", DataType::Utf8),
            Field::new("qty", DataType::Int32),
            Field::new("price", DataType::Float64),
        ])
    }

    fn r(region: &str, qty: Option<i32>, price: f64) -> Vec<Value> {
        vec![
            Value::Str(region.into()),
            qty.map(Value::I32).unwrap_or(Value::Null),
            Value::F64(price),
        ]
    }

    fn agg(func: AggFunc, column: Option<&str>, alias: &str) -> AggExpr {
        AggExpr {
            func,
            column: column.map(str::to_string),
            alias: alias.into(),
        }
    }

    #[test]
    fn aggregates_per_group_in_first_seen_order() {
        let mut op = GroupBy::new(
            vec!["region".into()],
            vec![
                agg(AggFunc::Count, None, "n"),
                agg(AggFunc::Count, Some("qty"), "n_qty"),
                agg(AggFunc::Sum, Some("qty"), "qty"),
                agg(AggFunc::Min, Some("price"), "lo"),
                agg(AggFunc::Max, Some("price"), "hi"),
                agg(AggFunc::Avg, Some("price"), "avg"),
            ],
            100,
        );
        let input = source(
            &md(),
            vec![
                vec![r("eu", Some(2), 1.0), r("us", Some(5), 4.0)],
                vec![r("eu", None, 3.0), r("eu", Some(4), 2.0)],
            ],
        );
        let out = run_collect(&mut op, vec![input]);
        assert_eq!(
            rows(&out),
            vec![
                vec![
                    Value::Str("eu".into()),
                    Value::I64(3),
                    Value::I64(2),
                    Value::I64(6),
                    Value::F64(1.0),
                    Value::F64(3.0),
                    Value::F64(2.0),
                ],
                vec![
                    Value::Str("us".into()),
                    Value::I64(1),
                    Value::I64(1),
                    Value::I64(5),
                    Value::F64(4.0),
                    Value::F64(4.0),
                    Value::F64(4.0),
                ],
            ]
        );
    }

    #[test]
    fn all_null_sum_is_null() {
        let mut op = GroupBy::new(vec![], vec![agg(AggFunc::Sum, Some("qty"), "s")], 10);
        let input = source(&md(), vec![vec![r("eu", None, 1.0)]]);
        let out = run_collect(&mut op, vec![input]);
        assert_eq!(rows(&out), vec![vec![Value::Null]]);
    }

    #[test]
    fn empty_input_emits_no_groups() {
        let mut op = GroupBy::new(vec![], vec![agg(AggFunc::Count, None, "n")], 10);
        let out = run_collect(&mut op, vec![source(&md(), vec![])]);
        assert!(out.is_empty());
        assert_eq!(out.metadata.columns[0].name, "n");
    }

    #[test]
    fn keyless_owner_emits_default_row_for_empty_input() {
        let aggs = vec![
            agg(AggFunc::Count, None, "n"),
            agg(AggFunc::Sum, Some("qty"), "qty"),
            agg(AggFunc::Max, Some("price"), "hi"),
            agg(AggFunc::Avg, Some("price"), "avg"),
        ];
        let mut op = GroupBy::new(vec![], aggs.clone(), 10).with_empty_row(true);
        let out = run_collect(&mut op, vec![source(&md(), vec![])]);
        assert_eq!(
            rows(&out),
            vec![vec![Value::I64(0), Value::Null, Value::Null, Value::Null]]
        );

        // rows seen: the normal aggregate, no extra default row
        let mut op = GroupBy::new(vec![], aggs, 10).with_empty_row(true);
        let input = source(&md(), vec![vec![r("eu", Some(2), 1.0)]]);
        let out = run_collect(&mut op, vec![input]);
        assert_eq!(
            rows(&out),
            vec![vec![Value::I64(1), Value::I64(2), Value::F64(1.0), Value::F64(1.0)]]
        );

        let mut op = GroupBy::new(vec!["region".into()], vec![agg(AggFunc::Count, None, "n")], 10)
            .with_empty_row(true);
        let out = run_collect(&mut op, vec![source(&md(), vec![])]);
        assert!(out.is_empty());
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let md = Metadata::new(vec![Field::new("v", DataType::Int64)]);
        let mut op = GroupBy::new(vec![], vec![agg(AggFunc::Sum, Some("v"), "s")], 10);
        let input = source(&md, vec![vec![vec![Value::I64(i64::MAX)], vec![Value::I64(1)]]]);
        let mut sink = crate::io::CollectSink::new();
        assert!(matches!(
            op.run(vec![input], &mut sink),
            Err(OpError::Arithmetic(_))
        ));
    }
}
