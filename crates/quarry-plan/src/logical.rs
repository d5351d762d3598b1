//! Logical plan tree produced by a `QueryCompiler`.

use quarry_core::prelude::{DataType, Field, Metadata};
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::expr::{Expr, SortItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(AggFunc::Count),
            "sum" => Ok(AggFunc::Sum),
            "min" => Ok(AggFunc::Min),
            "max" => Ok(AggFunc::Max),
            "avg" | "mean" => Ok(AggFunc::Avg),
            other => Err(PlanError::Compile(format!("unknown aggregate '{other}'"))),
        }
    }
}

/// `func(column) AS alias`; `column` is `None` only for `count(*)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggExpr {
    pub func: AggFunc,
    pub column: Option<String>,
    pub alias: String,
}

impl AggExpr {
    pub fn output_type(&self, input: &Metadata) -> Result<DataType> {
        let arg = match &self.column {
            Some(c) => Some(input.type_of(c)?),
            None => None,
        };
        match (self.func, arg) {
            (AggFunc::Count, _) => Ok(DataType::Int64),
            (AggFunc::Avg, Some(t)) if t.is_numeric() => Ok(DataType::Float64),
            (AggFunc::Sum, Some(t)) if t.is_float() => Ok(DataType::Float64),
            (AggFunc::Sum, Some(t)) if t.is_numeric() => Ok(DataType::Int64),
            (AggFunc::Min | AggFunc::Max, Some(t)) => Ok(t),
            (func, arg) => Err(PlanError::Invalid(format!(
                "{func:?} is not defined over {arg:?} (alias '{}')",
                self.alias
            ))),
        }
    }
}

/// Projection item: expression and output column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedExpr {
    pub expr: Expr,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    Scan {
        catalog: String,
        schema: String,
        table: String,
        metadata: Metadata,
        /// Stored partitions of the table.
        partitions: usize,
        filters: Vec<Expr>,
    },
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Projection {
        input: Box<LogicalPlan>,
        exprs: Vec<NamedExpr>,
    },
    GroupBy {
        input: Box<LogicalPlan>,
        keys: Vec<String>,
        aggs: Vec<AggExpr>,
    },
    OrderBy {
        input: Box<LogicalPlan>,
        items: Vec<SortItem>,
    },
    Limit {
        input: Box<LogicalPlan>,
        count: u64,
    },
}

impl LogicalPlan {
    pub fn input(&self) -> Option<&LogicalPlan> {
        use LogicalPlan::*;
        match self {
            Scan { .. } => None,
            Filter { input, .. }
            | Projection { input, .. }
            | GroupBy { input, .. }
            | OrderBy { input, .. }
            | Limit { input, .. } => Some(input),
        }
    }

    pub fn name(&self) -> &'static str {
        use LogicalPlan::*;
        match self {
            Scan { .. } => "scan",
            Filter { .. } => "filter",
            Projection { .. } => "projection",
            GroupBy { .. } => "group_by",
            OrderBy { .. } => "order_by",
            Limit { .. } => "limit",
        }
    }

    /// Output schema of this node, validating expressions on the way.
    pub fn metadata(&self) -> Result<Metadata> {
        use LogicalPlan::*;
        match self {
            Scan {
                metadata, filters, ..
            } => {
                for f in filters {
                    f.data_type(metadata)?;
                }
                Ok(metadata.clone())
            }
            Filter { input, predicate } => {
                let md = input.metadata()?;
                predicate.data_type(&md)?;
                Ok(md)
            }
            Projection { input, exprs } => {
                let md = input.metadata()?;
                let fields = exprs
                    .iter()
                    .map(|e| -> Result<Field> { Ok(Field::new(e.name.clone(), e.expr.data_type(&md)?)) })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Metadata::new(fields))
            }
            GroupBy { input, keys, aggs } => {
                let md = input.metadata()?;
                let mut fields = Vec::with_capacity(keys.len() + aggs.len());
                for k in keys {
                    fields.push(Field::new(k.clone(), md.type_of(k)?));
                }
                for a in aggs {
                    fields.push(Field::new(a.alias.clone(), a.output_type(&md)?));
                }
                Ok(Metadata::new(fields))
            }
            OrderBy { input, items } => {
                let md = input.metadata()?;
                for item in items {
                    item.expr.data_type(&md)?;
                }
                Ok(md)
            }
            Limit { input, .. } => input.metadata(),
        }
    }
}
