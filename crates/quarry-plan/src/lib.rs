#![forbid(unsafe_code)]
//! quarry-plan: from query text to a physical execution graph.
//!
//! - `expr`: the small expression language used by filters and sort items.
//! - `logical`: the `LogicalPlan` tree handed to the scheduler.
//! - `compile`: the `QueryCompiler` seam and the YAML `PipelineCompiler`.
//! - `eplan`: physical nodes bound to executor locations, the executor-count
//!   function the scheduler sizes against, and the `Instruction` envelope.

pub mod compile;
pub mod eplan;
pub mod error;
pub mod expr;
pub mod logical;

pub use compile::{PipelineCompiler, QueryCompiler};
pub use eplan::{
    create_eplan, describe_eplan, executor_number, ENodeKind, ENodeType, EPlanNode, Instruction,
    Partitioning,
};
pub use error::{PlanError, Result};
pub use expr::{CmpOp, Expr, SortItem};
pub use logical::{AggExpr, AggFunc, LogicalPlan, NamedExpr};
