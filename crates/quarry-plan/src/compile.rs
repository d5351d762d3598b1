//! Query text → `LogicalPlan`.
//!
//! `QueryCompiler` is the seam the scheduler compiles through. The bundled
//! `PipelineCompiler` accepts a YAML document describing a *linear* pipeline:
//!
//! ```yaml
//! steps:
//!   - op: scan
//!     table: orders
//!     partitions: 4
//!     columns:
//!       - { name: region, type: Utf8 }
//!       - { name: qty,    type: Int64 }
//!     filter: "qty > 0"
//!   - op: filter
//!     expr: "region != 'test'"
//!   - op: group_by
//!     keys: [region]
//!     aggs: [ { func: sum, column: qty, alias: total } ]
//!   - op: order_by
//!     items: ["total desc", "region"]
//!   - op: limit
//!     count: 10
//! ```

use quarry_core::prelude::{DataType, Field, Metadata};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, Result};
use crate::expr::{Expr, SortItem};
use crate::logical::{AggExpr, AggFunc, LogicalPlan, NamedExpr};

pub trait QueryCompiler: Send + Sync {
    /// Compile `query` with `catalog`/`schema` as the default namespace.
    fn compile(&self, query: &str, catalog: &str, schema: &str) -> Result<LogicalPlan>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Scan {
        table: String,
        #[serde(default)]
        catalog: Option<String>,
        #[serde(default)]
        schema: Option<String>,
        #[serde(default = "default_partitions")]
        partitions: usize,
        columns: Vec<FieldDef>,
        #[serde(default)]
        filter: Option<String>,
    },
    Filter {
        expr: String,
    },
    Project {
        columns: Vec<String>,
    },
    GroupBy {
        #[serde(default)]
        keys: Vec<String>,
        aggs: Vec<AggDef>,
    },
    OrderBy {
        items: Vec<String>,
    },
    Limit {
        count: u64,
    },
}

fn default_partitions() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggDef {
    pub func: String,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineCompiler;

impl PipelineCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl QueryCompiler for PipelineCompiler {
    fn compile(&self, query: &str, catalog: &str, schema: &str) -> Result<LogicalPlan> {
        let doc: Pipeline = serde_yaml::from_str(query)?;
        let steps = doc.steps.len();
        let mut cur: Option<LogicalPlan> = None;

        for step in doc.steps {
            cur = Some(match (step, cur) {
                (
                    Step::Scan {
                        table,
                        catalog: cat,
                        schema: sch,
                        partitions,
                        columns,
                        filter,
                    },
                    None,
                ) => {
                    if partitions == 0 {
                        return Err(PlanError::Compile(format!(
                            "table '{table}' declares zero partitions"
                        )));
                    }
                    LogicalPlan::Scan {
                        catalog: cat.unwrap_or_else(|| catalog.to_string()),
                        schema: sch.unwrap_or_else(|| schema.to_string()),
                        table,
                        metadata: to_metadata(&columns)?,
                        partitions,
                        filters: filter.as_deref().map(Expr::parse).transpose()?.into_iter().collect(),
                    }
                }
                (Step::Scan { .. }, Some(_)) => {
                    return Err(PlanError::Compile(
                        "multiple scans are not supported in a linear pipeline".into(),
                    ))
                }
                (Step::Filter { expr }, Some(input)) => LogicalPlan::Filter {
                    input: Box::new(input),
                    predicate: Expr::parse(&expr)?,
                },
                (Step::Project { columns }, Some(input)) => LogicalPlan::Projection {
                    input: Box::new(input),
                    exprs: columns
                        .iter()
                        .map(|c| parse_projection(c))
                        .collect::<Result<Vec<_>>>()?,
                },
                (Step::GroupBy { keys, aggs }, Some(input)) => LogicalPlan::GroupBy {
                    input: Box::new(input),
                    keys,
                    aggs: aggs.iter().map(to_agg).collect::<Result<Vec<_>>>()?,
                },
                (Step::OrderBy { items }, Some(input)) => LogicalPlan::OrderBy {
                    input: Box::new(input),
                    items: items
                        .iter()
                        .map(|s| SortItem::parse(s))
                        .collect::<Result<Vec<_>>>()?,
                },
                (Step::Limit { count }, Some(input)) => LogicalPlan::Limit {
                    input: Box::new(input),
                    count,
                },
                (s, None) => {
                    return Err(PlanError::Compile(format!(
                        "first step must be 'scan', got {s:?}"
                    )))
                }
            });
        }

        let plan = cur.ok_or_else(|| PlanError::Compile("empty pipeline".into()))?;
        plan.metadata()
            .map_err(|e| PlanError::Compile(e.to_string()))?;
        debug!(steps, root = plan.name(), "compiled pipeline");
        Ok(plan)
    }
}

fn to_metadata(fields: &[FieldDef]) -> Result<Metadata> {
    if fields.is_empty() {
        return Err(PlanError::Compile("scan declares no columns".into()));
    }
    let fields = fields
        .iter()
        .map(|f| -> Result<Field> { Ok(Field::new(f.name.clone(), DataType::parse(&f.data_type)?)) })
        .collect::<Result<Vec<_>>>()?;
    Ok(Metadata::new(fields))
}

/// `"col"` or `"col as alias"`.
fn parse_projection(text: &str) -> Result<NamedExpr> {
    let lower = text.to_ascii_lowercase();
    let (expr, name) = match lower.find(" as ") {
        Some(pos) => (&text[..pos], text[pos + 4..].trim()),
        None => (text, text.trim()),
    };
    Ok(NamedExpr {
        expr: Expr::parse(expr)?,
        name: name.to_string(),
    })
}

fn to_agg(def: &AggDef) -> Result<AggExpr> {
    let func = AggFunc::parse(&def.func)?;
    let column = def.column.clone().filter(|c| c != "*");
    if column.is_none() && func != AggFunc::Count {
        return Err(PlanError::Compile(format!("{} needs a column", def.func)));
    }
    let alias = def.alias.clone().unwrap_or_else(|| match &column {
        Some(c) => format!("{}_{c}", def.func.to_ascii_lowercase()),
        None => def.func.to_ascii_lowercase(),
    });
    Ok(AggExpr {
        func,
        column,
        alias,
    })
}
