//! Physical execution graph.
//!
//! An `EPlanNode` is one operator instance bound to one executor `Location`,
//! wired to its upstream (`inputs`) and downstream (`outputs`) peers. A node
//! without outputs is the root and keeps its output for the coordinator.
//!
//! Instance counts per logical node at parallelism `p`:
//! - scan: `min(p, partitions)`
//! - filter / projection: one per upstream instance
//! - group by: `p` hash-partitioned workers plus one union
//! - order by: `p` local sorters plus one merge
//! - limit: one
//! - plus one union root when the top of the plan is still fanned out.
//!
//! Every term is non-decreasing in `p`, so the total is too.

use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quarry_core::prelude::{Location, Metadata, TaskId};
use quarry_split::hash_partition;
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::expr::{Expr, SortItem};
use crate::logical::{AggExpr, LogicalPlan, NamedExpr};

/// How a node spreads its rows over its `outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Partitioning {
    /// Exactly one output receives everything.
    Single,
    /// Paired with a single downstream instance of a 1:1 stage.
    OneToOne,
    /// Batches rotate over the outputs.
    RoundRobin,
    /// Each row goes to `hash(keys) % outputs.len()`.
    Hash(Vec<String>),
}

/// Discriminant carried next to the encoded node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ENodeType {
    Scan,
    Filter,
    Projection,
    GroupBy,
    OrderByLocal,
    OrderBy,
    Limit,
    Union,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ENodeKind {
    Scan {
        catalog: String,
        schema: String,
        table: String,
        /// Partition indices this instance reads.
        partitions: Vec<usize>,
        metadata: Metadata,
        filters: Vec<Expr>,
    },
    Filter {
        predicate: Expr,
    },
    Projection {
        exprs: Vec<NamedExpr>,
    },
    GroupBy {
        keys: Vec<String>,
        aggs: Vec<AggExpr>,
        /// Emit the single aggregate row even without input. Set only on the
        /// worker that owns the bucket of a key-less aggregation.
        empty_row: bool,
    },
    /// Buffer, key and sort one partition.
    OrderByLocal {
        items: Vec<SortItem>,
    },
    /// Merge locally sorted, key-carrying streams.
    OrderBy {
        items: Vec<SortItem>,
    },
    Limit {
        count: u64,
    },
    Union,
}

impl ENodeKind {
    pub fn node_type(&self) -> ENodeType {
        match self {
            ENodeKind::Scan { .. } => ENodeType::Scan,
            ENodeKind::Filter { .. } => ENodeType::Filter,
            ENodeKind::Projection { .. } => ENodeType::Projection,
            ENodeKind::GroupBy { .. } => ENodeType::GroupBy,
            ENodeKind::OrderByLocal { .. } => ENodeType::OrderByLocal,
            ENodeKind::OrderBy { .. } => ENodeType::OrderBy,
            ENodeKind::Limit { .. } => ENodeType::Limit,
            ENodeKind::Union => ENodeType::Union,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EPlanNode {
    pub location: Location,
    pub inputs: Vec<Location>,
    pub outputs: Vec<Location>,
    pub partitioning: Partitioning,
    pub kind: ENodeKind,
}

impl EPlanNode {
    pub fn node_type(&self) -> ENodeType {
        self.kind.node_type()
    }

    pub fn is_root(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Work unit shipped to one executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub task_id: TaskId,
    pub node_type: ENodeType,
    pub catalog: String,
    pub schema: String,
    /// base64(bincode(EPlanNode)).
    pub encoded_node: String,
}

impl Instruction {
    pub fn new(task_id: TaskId, catalog: &str, schema: &str, node: &EPlanNode) -> Result<Self> {
        let bytes = bincode::serialize(node)?;
        Ok(Self {
            task_id,
            node_type: node.node_type(),
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            encoded_node: BASE64.encode(bytes),
        })
    }

    /// Decode the node and check it against the declared type tag.
    pub fn decode_node(&self) -> Result<EPlanNode> {
        let bytes = BASE64.decode(self.encoded_node.as_bytes())?;
        let node: EPlanNode = bincode::deserialize(&bytes)?;
        if node.node_type() != self.node_type {
            return Err(PlanError::Encoding(format!(
                "instruction tagged {:?} carries a {:?} node",
                self.node_type,
                node.node_type()
            )));
        }
        Ok(node)
    }
}

/// (total executors, instances at the top of `plan`).
fn shape(plan: &LogicalPlan, p: usize) -> Result<(usize, usize)> {
    Ok(match plan {
        LogicalPlan::Scan { partitions, .. } => {
            let k = p.min((*partitions).max(1));
            (k, k)
        }
        LogicalPlan::Filter { input, .. } | LogicalPlan::Projection { input, .. } => {
            let (total, k) = shape(input, p)?;
            (total + k, k)
        }
        LogicalPlan::GroupBy { input, .. } | LogicalPlan::OrderBy { input, .. } => {
            let (total, _) = shape(input, p)?;
            (total + p + 1, 1)
        }
        LogicalPlan::Limit { input, .. } => {
            let (total, _) = shape(input, p)?;
            (total + 1, 1)
        }
    })
}

/// Executors needed to run `plan` at parallelism `p` (`p >= 1`).
pub fn executor_number(plan: &LogicalPlan, p: usize) -> Result<usize> {
    if p == 0 {
        return Err(PlanError::Invalid("parallelism must be at least 1".into()));
    }
    let (total, top) = shape(plan, p)?;
    Ok(if top > 1 { total + 1 } else { total })
}

/// Where the instances of a stage send their output.
enum Targets {
    /// Root stage: keep results.
    Root,
    /// Instance `i` feeds `locations[i]`.
    Paired(Vec<Location>),
    /// Every instance feeds every location.
    Fanout(Vec<Location>, Partitioning),
}

impl Targets {
    fn for_instance(&self, i: usize) -> (Vec<Location>, Partitioning) {
        match self {
            Targets::Root => (Vec::new(), Partitioning::Single),
            Targets::Paired(locs) => (vec![locs[i].clone()], Partitioning::OneToOne),
            Targets::Fanout(locs, _) if locs.len() == 1 => (locs.clone(), Partitioning::Single),
            Targets::Fanout(locs, part) => (locs.clone(), part.clone()),
        }
    }
}

/// Build the physical graph of `plan` at parallelism `p`, binding nodes to the
/// first `executor_number(plan, p)` entries of `free`, which are removed.
/// Every node is appended to `nodes`; the root node is returned.
pub fn create_eplan(
    plan: &LogicalPlan,
    nodes: &mut Vec<EPlanNode>,
    free: &mut Vec<Location>,
    p: usize,
) -> Result<EPlanNode> {
    let needed = executor_number(plan, p)?;
    if free.len() < needed {
        return Err(PlanError::Capacity {
            needed,
            available: free.len(),
        });
    }
    let mut pool: Vec<Location> = free.drain(..needed).collect();
    pool.reverse();

    let (_, top) = shape(plan, p)?;
    let root = if top > 1 {
        let root_loc = take(&mut pool)?;
        let tops = build(plan, nodes, &mut pool, p, Targets::Paired(vec![root_loc.clone(); top]))?;
        let union = EPlanNode {
            location: root_loc,
            inputs: tops,
            outputs: Vec::new(),
            partitioning: Partitioning::Single,
            kind: ENodeKind::Union,
        };
        nodes.push(union.clone());
        union
    } else {
        let tops = build(plan, nodes, &mut pool, p, Targets::Root)?;
        let root_loc = tops
            .first()
            .ok_or_else(|| PlanError::Invalid("plan produced no root".into()))?;
        nodes
            .iter()
            .rev()
            .find(|n| &n.location == root_loc)
            .cloned()
            .ok_or_else(|| PlanError::Invalid("root node missing".into()))?
    };

    debug_assert!(pool.is_empty());
    tracing::debug!(nodes = nodes.len(), parallelism = p, root = %root.location, "created eplan");
    Ok(root)
}

/// `pool` is reversed so that `pop` hands out locations in their original order.
fn take(pool: &mut Vec<Location>) -> Result<Location> {
    pool.pop()
        .ok_or_else(|| PlanError::Invalid("ran out of executors while binding plan".into()))
}

fn take_n(pool: &mut Vec<Location>, n: usize) -> Result<Vec<Location>> {
    (0..n).map(|_| take(pool)).collect()
}

/// Build one stage (and, recursively, its inputs). Locations are taken for the
/// stage before its inputs so allocation runs top-down. Returns the stage's
/// output-facing locations.
fn build(
    plan: &LogicalPlan,
    nodes: &mut Vec<EPlanNode>,
    pool: &mut Vec<Location>,
    p: usize,
    targets: Targets,
) -> Result<Vec<Location>> {
    match plan {
        LogicalPlan::Scan {
            catalog,
            schema,
            table,
            metadata,
            partitions,
            filters,
        } => {
            let k = p.min((*partitions).max(1));
            let locs = take_n(pool, k)?;
            for (i, loc) in locs.iter().enumerate() {
                let (outputs, partitioning) = targets.for_instance(i);
                nodes.push(EPlanNode {
                    location: loc.clone(),
                    inputs: Vec::new(),
                    outputs,
                    partitioning,
                    kind: ENodeKind::Scan {
                        catalog: catalog.clone(),
                        schema: schema.clone(),
                        table: table.clone(),
                        partitions: (i..*partitions).step_by(k).collect(),
                        metadata: metadata.clone(),
                        filters: filters.clone(),
                    },
                });
            }
            Ok(locs)
        }
        LogicalPlan::Filter { input, .. } | LogicalPlan::Projection { input, .. } => {
            let (_, k) = shape(input, p)?;
            let locs = take_n(pool, k)?;
            let upstream = build(input, nodes, pool, p, Targets::Paired(locs.clone()))?;
            let kind = match plan {
                LogicalPlan::Filter { predicate, .. } => ENodeKind::Filter {
                    predicate: predicate.clone(),
                },
                LogicalPlan::Projection { exprs, .. } => ENodeKind::Projection {
                    exprs: exprs.clone(),
                },
                _ => unreachable!("outer match restricts the variant"),
            };
            for (i, loc) in locs.iter().enumerate() {
                let (outputs, partitioning) = targets.for_instance(i);
                nodes.push(EPlanNode {
                    location: loc.clone(),
                    inputs: vec![upstream[i].clone()],
                    outputs,
                    partitioning,
                    kind: kind.clone(),
                });
            }
            Ok(locs)
        }
        LogicalPlan::GroupBy { input, keys, aggs } => {
            let union_loc = take(pool)?;
            let workers = take_n(pool, p)?;
            let upstream = build(
                input,
                nodes,
                pool,
                p,
                Targets::Fanout(workers.clone(), Partitioning::Hash(keys.clone())),
            )?;
            let owner = keys.is_empty().then(|| hash_partition(&[], workers.len()));
            for (i, loc) in workers.iter().enumerate() {
                nodes.push(EPlanNode {
                    location: loc.clone(),
                    inputs: upstream.clone(),
                    outputs: vec![union_loc.clone()],
                    partitioning: Partitioning::Single,
                    kind: ENodeKind::GroupBy {
                        keys: keys.clone(),
                        aggs: aggs.clone(),
                        empty_row: owner == Some(i),
                    },
                });
            }
            let (outputs, partitioning) = targets.for_instance(0);
            nodes.push(EPlanNode {
                location: union_loc.clone(),
                inputs: workers,
                outputs,
                partitioning,
                kind: ENodeKind::Union,
            });
            Ok(vec![union_loc])
        }
        LogicalPlan::OrderBy { input, items } => {
            let merge_loc = take(pool)?;
            let sorters = take_n(pool, p)?;
            let upstream = build(
                input,
                nodes,
                pool,
                p,
                Targets::Fanout(sorters.clone(), Partitioning::RoundRobin),
            )?;
            for loc in &sorters {
                nodes.push(EPlanNode {
                    location: loc.clone(),
                    inputs: upstream.clone(),
                    outputs: vec![merge_loc.clone()],
                    partitioning: Partitioning::Single,
                    kind: ENodeKind::OrderByLocal {
                        items: items.clone(),
                    },
                });
            }
            let (outputs, partitioning) = targets.for_instance(0);
            nodes.push(EPlanNode {
                location: merge_loc.clone(),
                inputs: sorters,
                outputs,
                partitioning,
                kind: ENodeKind::OrderBy {
                    items: items.clone(),
                },
            });
            Ok(vec![merge_loc])
        }
        LogicalPlan::Limit { input, count } => {
            let loc = take(pool)?;
            let upstream = build(
                input,
                nodes,
                pool,
                p,
                Targets::Fanout(vec![loc.clone()], Partitioning::Single),
            )?;
            let (outputs, partitioning) = targets.for_instance(0);
            nodes.push(EPlanNode {
                location: loc.clone(),
                inputs: upstream,
                outputs,
                partitioning,
                kind: ENodeKind::Limit { count: *count },
            });
            Ok(vec![loc])
        }
    }
}

/// Human-readable listing of a physical graph, one node per line.
pub fn describe_eplan(nodes: &[EPlanNode]) -> String {
    let names = |locs: &[Location]| {
        locs.iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };
    let mut out = String::new();
    for n in nodes {
        let detail = match &n.kind {
            ENodeKind::Scan {
                table, partitions, ..
            } => format!("table={table} partitions={partitions:?}"),
            ENodeKind::Filter { predicate } => format!("predicate={predicate}"),
            ENodeKind::Projection { exprs } => format!(
                "columns=[{}]",
                exprs.iter().map(|e| e.name.as_str()).collect::<Vec<_>>().join(",")
            ),
            ENodeKind::GroupBy { keys, aggs, .. } => format!("keys={keys:?} aggs={}", aggs.len()),
            ENodeKind::OrderByLocal { items } | ENodeKind::OrderBy { items } => format!(
                "items=[{}]",
                items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
            ),
            ENodeKind::Limit { count } => format!("count={count}"),
            ENodeKind::Union => String::new(),
        };
        let _ = writeln!(
            out,
            "{:<14} @{:<12} in=[{}] out=[{}] {:?} {}",
            format!("{:?}", n.node_type()),
            n.location.name,
            names(&n.inputs),
            names(&n.outputs),
            n.partitioning,
            detail
        );
    }
    out
}
