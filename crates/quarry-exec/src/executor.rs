//! Per-process executor state machine.
//!
//! One executor holds at most one plan node at a time:
//!
//! ```text
//! Idle ─send_instruction→ Received ─setup_writers→ WritersReady
//!      ─setup_readers→ ReadersReady ─run→ Running → Done | Failed
//! ```
//!
//! `send_instruction` is also accepted from `Done` and `Failed`, and `abort`
//! returns to `Idle` from anywhere. Every reset bumps an epoch so a worker
//! thread or a reader dial that outlives its task cannot touch the next one.
//!
//! Egress connections are opened by the downstream reader (`OpenStream`) and
//! attached here by the server; ingress connections are dialed by
//! `setup_readers`.

use std::fmt;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use quarry_core::prelude::{EngineConfig, Location, TaskId};
use quarry_plan::{EPlanNode, Instruction};
use quarry_split::{Split, SplitReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExecError, OpError};
use crate::io::{CollectSink, OutputRouter, SplitSink, SplitSource};
use crate::operators::{build_operator, OpContext};
use crate::provider::TableProvider;
use crate::rpc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    #[default]
    Idle,
    Received,
    WritersReady,
    ReadersReady,
    Running,
    Done,
    Failed,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Received => "received",
            ExecutorState::WritersReady => "writers_ready",
            ExecutorState::ReadersReady => "readers_ready",
            ExecutorState::Running => "running",
            ExecutorState::Done => "done",
            ExecutorState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What `Status` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub task_id: Option<TaskId>,
    pub state: ExecutorState,
    /// Set when `state` is `Failed`.
    pub error: Option<String>,
}

struct Egress {
    reader: Location,
    stream: Option<TcpStream>,
}

#[derive(Default)]
struct Slot {
    state: ExecutorState,
    task_id: Option<TaskId>,
    node: Option<EPlanNode>,
    egress: Vec<Egress>,
    ingress: Vec<TcpStream>,
    results: Option<Split>,
    error: Option<String>,
    epoch: u64,
    /// Handles of every open data connection, shut down on abort so a
    /// running worker unblocks.
    live: Vec<TcpStream>,
}

impl Slot {
    fn require(&self, op: &'static str, allowed: &[ExecutorState]) -> Result<(), ExecError> {
        let state = self.state;
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(ExecError::InvalidState {
                op,
                state: state.to_string(),
            })
        }
    }

    fn require_task(&self, requested: TaskId) -> Result<(), ExecError> {
        if self.task_id == Some(requested) {
            Ok(())
        } else {
            Err(ExecError::TaskMismatch {
                held: self.task_id,
                requested,
            })
        }
    }

    fn reset(&mut self) {
        for stream in self.live.drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let epoch = self.epoch + 1;
        *self = Slot {
            epoch,
            ..Slot::default()
        };
    }
}

pub struct Executor {
    location: Location,
    ctx: OpContext,
    slot: Arc<Mutex<Slot>>,
}

impl Executor {
    pub fn new(location: Location, provider: Arc<dyn TableProvider>, config: &EngineConfig) -> Self {
        Self {
            location,
            ctx: OpContext::new(provider, config),
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn state(&self) -> ExecutorState {
        self.slot.lock().state
    }

    pub fn status(&self) -> StatusReport {
        let slot = self.slot.lock();
        StatusReport {
            task_id: slot.task_id,
            state: slot.state,
            error: slot.error.clone(),
        }
    }

    /// Accept a new plan node. Any leftovers of a finished task are dropped.
    pub fn send_instruction(&self, instruction: &Instruction) -> Result<(), ExecError> {
        let node = instruction.decode_node()?;
        if node.location.name != self.location.name {
            return Err(ExecError::WrongExecutor {
                expected: node.location.name,
                actual: self.location.name.clone(),
            });
        }

        let mut slot = self.slot.lock();
        slot.require(
            "send_instruction",
            &[ExecutorState::Idle, ExecutorState::Done, ExecutorState::Failed],
        )?;
        slot.reset();
        info!(
            executor = %self.location.name,
            task = %instruction.task_id,
            node = ?node.node_type(),
            inputs = node.inputs.len(),
            outputs = node.outputs.len(),
            "instruction received"
        );
        slot.task_id = Some(instruction.task_id);
        slot.node = Some(node);
        slot.state = ExecutorState::Received;
        Ok(())
    }

    /// Open one egress slot per output location.
    pub fn setup_writers(&self) -> Result<(), ExecError> {
        let mut slot = self.slot.lock();
        slot.require("setup_writers", &[ExecutorState::Received])?;
        let outputs = slot
            .node
            .as_ref()
            .map(|n| n.outputs.clone())
            .unwrap_or_default();
        slot.egress = outputs
            .into_iter()
            .map(|reader| Egress {
                reader,
                stream: None,
            })
            .collect();
        slot.state = ExecutorState::WritersReady;
        debug!(executor = %self.location.name, outputs = slot.egress.len(), "writers ready");
        Ok(())
    }

    /// Dial every input and wait for each upstream to acknowledge the stream.
    /// The dials happen without holding the slot lock.
    pub fn setup_readers(&self) -> Result<(), ExecError> {
        let (task_id, inputs, epoch) = {
            let slot = self.slot.lock();
            slot.require("setup_readers", &[ExecutorState::WritersReady])?;
            let task_id = slot.task_id.ok_or_else(|| ExecError::InvalidState {
                op: "setup_readers",
                state: "no task".into(),
            })?;
            let inputs = slot
                .node
                .as_ref()
                .map(|n| n.inputs.clone())
                .unwrap_or_default();
            (task_id, inputs, slot.epoch)
        };

        let mut streams = Vec::with_capacity(inputs.len());
        for upstream in &inputs {
            let stream = rpc::open_stream(upstream, task_id, &self.location).map_err(|source| {
                ExecError::Peer {
                    location: upstream.to_string(),
                    source,
                }
            })?;
            streams.push(stream);
        }

        let mut slot = self.slot.lock();
        if slot.epoch != epoch {
            for s in &streams {
                let _ = s.shutdown(Shutdown::Both);
            }
            return Err(ExecError::InvalidState {
                op: "setup_readers",
                state: "aborted".into(),
            });
        }
        for s in &streams {
            slot.live.push(s.try_clone()?);
        }
        slot.ingress = streams;
        slot.state = ExecutorState::ReadersReady;
        debug!(executor = %self.location.name, inputs = inputs.len(), "readers ready");
        Ok(())
    }

    /// Hand a connection opened by `reader` to the matching egress slot.
    pub fn attach_egress(&self, task_id: TaskId, reader: &Location, stream: TcpStream) -> Result<(), ExecError> {
        let mut slot = self.slot.lock();
        slot.require_task(task_id)?;
        slot.require(
            "open_stream",
            &[ExecutorState::WritersReady, ExecutorState::ReadersReady],
        )?;
        let live = stream.try_clone()?;
        let egress = slot
            .egress
            .iter_mut()
            .find(|e| e.reader.name == reader.name && e.stream.is_none())
            .ok_or_else(|| ExecError::UnknownReader(reader.name.clone()))?;
        egress.stream = Some(stream);
        slot.live.push(live);
        debug!(executor = %self.location.name, reader = %reader.name, "egress attached");
        Ok(())
    }

    /// Start the node on a worker thread and return at once. The outcome is
    /// visible through `status()`.
    pub fn run(&self) -> Result<(), ExecError> {
        let mut slot = self.slot.lock();
        slot.require("run", &[ExecutorState::ReadersReady])?;
        if let Some(missing) = slot.egress.iter().find(|e| e.stream.is_none()) {
            return Err(ExecError::Unattached(missing.reader.name.clone()));
        }
        let node = slot.node.clone().ok_or_else(|| ExecError::InvalidState {
            op: "run",
            state: "no node".into(),
        })?;
        let ingress = std::mem::take(&mut slot.ingress);
        let egress: Vec<TcpStream> = std::mem::take(&mut slot.egress)
            .into_iter()
            .filter_map(|e| e.stream)
            .collect();
        let epoch = slot.epoch;
        let task_id = slot.task_id;
        slot.state = ExecutorState::Running;
        drop(slot);

        let shared = Arc::clone(&self.slot);
        let ctx = self.ctx.clone();
        let name = self.location.name.clone();
        info!(executor = %name, task = ?task_id, node = ?node.node_type(), "running");
        thread::Builder::new()
            .name(format!("quarry-{}", name))
            .spawn(move || {
                let outcome = execute(&node, &ctx, ingress, egress);
                let mut slot = shared.lock();
                if slot.epoch != epoch {
                    debug!(executor = %name, "discarding outcome of aborted run");
                    return;
                }
                match outcome {
                    Ok(results) => {
                        slot.results = results;
                        slot.state = ExecutorState::Done;
                        info!(executor = %name, task = ?task_id, "node finished");
                    }
                    Err(e) => {
                        warn!(executor = %name, task = ?task_id, error = %e, "node failed");
                        slot.error = Some(e.to_string());
                        slot.state = ExecutorState::Failed;
                    }
                }
                for stream in slot.live.drain(..) {
                    let _ = stream.shutdown(Shutdown::Write);
                }
            })?;
        Ok(())
    }

    /// Drop everything held for `task_id` and go back to `Idle`. Aborting an
    /// idle executor is a no-op.
    pub fn abort(&self, task_id: TaskId) -> Result<(), ExecError> {
        let mut slot = self.slot.lock();
        if slot.task_id.is_some() {
            slot.require_task(task_id)?;
        }
        let was = slot.state;
        slot.reset();
        info!(executor = %self.location.name, task = %task_id, from = %was, "aborted");
        Ok(())
    }

    /// Output of a finished root node.
    pub fn fetch_results(&self, task_id: TaskId) -> Result<Split, ExecError> {
        let slot = self.slot.lock();
        slot.require_task(task_id)?;
        slot.require("fetch_results", &[ExecutorState::Done])?;
        slot.results.clone().ok_or(ExecError::NoResults(task_id))
    }

    pub fn batch_rows(&self) -> usize {
        self.ctx.batch_rows
    }
}

/// Run one node to completion. Root nodes collect their output in memory;
/// every other node routes it to the downstream connections.
fn execute(
    node: &EPlanNode,
    ctx: &OpContext,
    ingress: Vec<TcpStream>,
    egress: Vec<TcpStream>,
) -> Result<Option<Split>, OpError> {
    let mut op = build_operator(&node.kind, ctx);
    let inputs: Vec<Box<dyn SplitSource>> = ingress
        .into_iter()
        .map(|s| Box::new(SplitReader::new(s)) as Box<dyn SplitSource>)
        .collect();

    if node.is_root() {
        let mut sink = CollectSink::new();
        let stats = op.run(inputs, &mut sink)?;
        sink.finish()?;
        debug!(op = op.name(), rows_in = stats.rows_in, rows_out = stats.rows_out, "root operator done");
        Ok(sink.into_split())
    } else {
        let mut router = OutputRouter::new(egress, node.partitioning.clone(), ctx.batch_rows);
        let stats = op.run(inputs, &mut router)?;
        router.finish()?;
        debug!(op = op.name(), rows_in = stats.rows_in, rows_out = stats.rows_out, "operator done");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryTableProvider;
    use quarry_core::prelude::{DataType, Field, Metadata};
    use quarry_plan::{ENodeKind, Partitioning};

    fn location(name: &str) -> Location {
        Location::new(name, "127.0.0.1", 1)
    }

    fn executor(name: &str) -> Executor {
        Executor::new(
            location(name),
            Arc::new(MemoryTableProvider::new()),
            &EngineConfig::default(),
        )
    }

    fn scan_instruction(task: u64, at: &str, outputs: Vec<Location>) -> Instruction {
        let node = EPlanNode {
            location: location(at),
            inputs: vec![],
            outputs,
            partitioning: Partitioning::Single,
            kind: ENodeKind::Scan {
                catalog: "c".into(),
                schema: "s".into(),
                table: "t".into(),
                partitions: vec![0],
                metadata: Metadata::new(vec![Field::new("x", DataType::Int64)]),
                filters: vec![],
            },
        };
        Instruction::new(TaskId::new(task), "c", "s", &node).unwrap()
    }

    #[test]
    fn run_before_setup_readers_is_rejected() {
        let exec = executor("e0");
        exec.send_instruction(&scan_instruction(1, "e0", vec![])).unwrap();
        assert!(matches!(
            exec.run(),
            Err(ExecError::InvalidState { op: "run", .. })
        ));
        exec.setup_writers().unwrap();
        assert!(matches!(exec.run(), Err(ExecError::InvalidState { .. })));
        assert_eq!(exec.state(), ExecutorState::WritersReady);
    }

    #[test]
    fn phases_must_come_in_order() {
        let exec = executor("e0");
        assert!(exec.setup_writers().is_err());
        assert!(exec.setup_readers().is_err());
        exec.send_instruction(&scan_instruction(1, "e0", vec![])).unwrap();
        assert!(exec.setup_readers().is_err());
        // a second instruction while one is pending is refused
        assert!(exec.send_instruction(&scan_instruction(2, "e0", vec![])).is_err());
    }

    #[test]
    fn instruction_for_another_executor_is_refused() {
        let exec = executor("e0");
        let err = exec
            .send_instruction(&scan_instruction(1, "e1", vec![]))
            .unwrap_err();
        assert!(matches!(err, ExecError::WrongExecutor { .. }));
        assert_eq!(exec.state(), ExecutorState::Idle);
    }

    #[test]
    fn run_requires_every_output_attached() {
        let exec = executor("e0");
        exec.send_instruction(&scan_instruction(1, "e0", vec![location("down")]))
            .unwrap();
        exec.setup_writers().unwrap();
        exec.setup_readers().unwrap();
        assert_eq!(exec.state(), ExecutorState::ReadersReady);
        assert!(matches!(exec.run(), Err(ExecError::Unattached(r)) if r == "down"));
    }

    #[test]
    fn abort_resets_and_checks_task() {
        let exec = executor("e0");
        exec.abort(TaskId::new(7)).unwrap();
        exec.send_instruction(&scan_instruction(1, "e0", vec![])).unwrap();
        assert!(matches!(
            exec.abort(TaskId::new(2)),
            Err(ExecError::TaskMismatch { .. })
        ));
        exec.abort(TaskId::new(1)).unwrap();
        let status = exec.status();
        assert_eq!(status.state, ExecutorState::Idle);
        assert_eq!(status.task_id, None);
    }

    #[test]
    fn root_scan_finishes_with_results() {
        let provider = MemoryTableProvider::new();
        let md = Metadata::new(vec![Field::new("x", DataType::Int64)]);
        let mut split = Split::new(md);
        split
            .append_row(vec![quarry_core::prelude::Value::I64(42)])
            .unwrap();
        provider.insert_table("c", "s", "t", vec![vec![split]]);
        let exec = Executor::new(location("e0"), Arc::new(provider), &EngineConfig::default());

        exec.send_instruction(&scan_instruction(3, "e0", vec![])).unwrap();
        exec.setup_writers().unwrap();
        exec.setup_readers().unwrap();
        exec.run().unwrap();
        for _ in 0..500 {
            if exec.state() != ExecutorState::Running {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(exec.state(), ExecutorState::Done);
        let out = exec.fetch_results(TaskId::new(3)).unwrap();
        assert_eq!(out.num_rows(), 1);
        assert!(matches!(
            exec.fetch_results(TaskId::new(4)),
            Err(ExecError::TaskMismatch { .. })
        ));
    }
}
