//! Streaming operators.
//!
//! Each physical node kind maps to one `Operator`. `build_operator` is the only
//! place that knows the mapping, so adding a node kind means adding a variant
//! to `ENodeKind` and an arm here.
//!
//! Operators own the metadata handshake: they read input metadata first, write
//! their output metadata before any rows, and leave `finish()` of the sink to
//! the caller so a failed run never writes an end-of-stream frame.

use std::sync::Arc;

use quarry_core::prelude::EngineConfig;
use quarry_plan::ENodeKind;

use crate::error::OpError;
use crate::io::{Fanin, SplitSink, SplitSource};
use crate::provider::TableProvider;

pub mod filter;
pub mod group_by;
pub mod limit;
pub mod order_by;
pub mod scan;
pub mod union;

pub use filter::{Filter, Projection};
pub use group_by::GroupBy;
pub use limit::Limit;
pub use order_by::{OrderByLocal, OrderByMerge};
pub use scan::Scan;
pub use union::Union;

/// Shared inputs every operator may need besides its node parameters.
#[derive(Clone)]
pub struct OpContext {
    pub provider: Arc<dyn TableProvider>,
    pub batch_rows: usize,
    pub sort_buffer_limit_rows: Option<usize>,
}

impl OpContext {
    pub fn new(provider: Arc<dyn TableProvider>, config: &EngineConfig) -> Self {
        Self {
            provider,
            batch_rows: config.split_batch_rows,
            sort_buffer_limit_rows: config.sort_buffer_limit_rows,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub rows_in: u64,
    pub rows_out: u64,
}

pub trait Operator: Send {
    /// Stable operator name.
    fn name(&self) -> &'static str;

    /// Consume every input to end of stream and write the output to `sink`.
    fn run(
        &mut self,
        inputs: Vec<Box<dyn SplitSource>>,
        sink: &mut dyn SplitSink,
    ) -> Result<OpStats, OpError>;
}

pub fn build_operator(kind: &ENodeKind, ctx: &OpContext) -> Box<dyn Operator> {
    match kind.clone() {
        ENodeKind::Scan {
            catalog,
            schema,
            table,
            partitions,
            metadata,
            filters,
        } => Box::new(Scan {
            provider: ctx.provider.clone(),
            catalog,
            schema,
            table,
            partitions,
            metadata,
            filters,
        }),
        ENodeKind::Filter { predicate } => Box::new(Filter { predicate }),
        ENodeKind::Projection { exprs } => Box::new(Projection { exprs }),
        ENodeKind::GroupBy {
            keys,
            aggs,
            empty_row,
        } => Box::new(GroupBy::new(keys, aggs, ctx.batch_rows).with_empty_row(empty_row)),
        ENodeKind::OrderByLocal { items } => Box::new(OrderByLocal {
            items,
            limit_rows: ctx.sort_buffer_limit_rows,
        }),
        ENodeKind::OrderBy { items } => Box::new(OrderByMerge {
            items,
            batch_rows: ctx.batch_rows,
        }),
        ENodeKind::Limit { count } => Box::new(Limit { count }),
        ENodeKind::Union => Box::new(Union),
    }
}

/// Collapse a node's inputs into one source.
pub(crate) fn merged_input(mut inputs: Vec<Box<dyn SplitSource>>) -> Result<Box<dyn SplitSource>, OpError> {
    match inputs.len() {
        0 => Err(OpError::Exec("operator needs at least one input".into())),
        1 => Ok(inputs.remove(0)),
        _ => Ok(Box::new(Fanin::start(inputs)?)),
    }
}
