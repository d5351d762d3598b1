//! Four-phase dispatch of a physical plan.
//!
//! Phase A sends every node its instruction, B opens output slots, C has
//! every node dial its inputs, D starts them. A phase must succeed on every
//! node before the next one begins: outputs exist before any reader dials
//! them, and nothing runs before the whole graph is wired.

use std::fmt;
use std::thread;

use quarry_core::prelude::{DispatchMode, Location, TaskId};
use quarry_exec::RpcError;
use quarry_plan::Instruction;
use tracing::{debug, info, warn};

use crate::client::ExecutorClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SendInstruction,
    SetupWriters,
    SetupReaders,
    Run,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::SendInstruction,
        Phase::SetupWriters,
        Phase::SetupReaders,
        Phase::Run,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::SendInstruction => "send_instruction",
            Phase::SetupWriters => "setup_writers",
            Phase::SetupReaders => "setup_readers",
            Phase::Run => "run",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct DispatchFailure {
    pub phase: Phase,
    pub location: Location,
    pub source: RpcError,
    /// Every executor that was sent an instruction, in plan order.
    pub contacted: Vec<Location>,
}

fn call(client: &dyn ExecutorClient, phase: Phase, location: &Location, instruction: &Instruction) -> Result<(), RpcError> {
    match phase {
        Phase::SendInstruction => client.send_instruction(location, instruction),
        Phase::SetupWriters => client.setup_writers(location),
        Phase::SetupReaders => client.setup_readers(location),
        Phase::Run => client.run(location),
    }
}

/// Run all four phases over `nodes` (executor location and its instruction).
pub fn dispatch(
    client: &dyn ExecutorClient,
    task_id: TaskId,
    nodes: &[(Location, Instruction)],
    mode: DispatchMode,
) -> Result<(), DispatchFailure> {
    let mut contacted: Vec<Location> = Vec::new();
    for phase in Phase::ALL {
        debug!(task = %task_id, %phase, nodes = nodes.len(), "dispatch phase");
        let outcome = match mode {
            DispatchMode::Sequential => run_sequential(client, phase, nodes, &mut contacted),
            DispatchMode::Parallel => run_parallel(client, phase, nodes, &mut contacted),
        };
        if let Err((location, source)) = outcome {
            warn!(task = %task_id, %phase, executor = %location.name, error = %source, "dispatch failed");
            return Err(DispatchFailure {
                phase,
                location,
                source,
                contacted,
            });
        }
    }
    info!(task = %task_id, nodes = nodes.len(), "dispatched");
    Ok(())
}

fn run_sequential(
    client: &dyn ExecutorClient,
    phase: Phase,
    nodes: &[(Location, Instruction)],
    contacted: &mut Vec<Location>,
) -> Result<(), (Location, RpcError)> {
    for (location, instruction) in nodes {
        if phase == Phase::SendInstruction {
            contacted.push(location.clone());
        }
        call(client, phase, location, instruction).map_err(|e| (location.clone(), e))?;
    }
    Ok(())
}

/// Every node of the phase is called at once; the scope join is the barrier.
/// The first failure in plan order is reported.
fn run_parallel(
    client: &dyn ExecutorClient,
    phase: Phase,
    nodes: &[(Location, Instruction)],
    contacted: &mut Vec<Location>,
) -> Result<(), (Location, RpcError)> {
    if phase == Phase::SendInstruction {
        contacted.extend(nodes.iter().map(|(l, _)| l.clone()));
    }
    let results: Vec<Result<(), RpcError>> = thread::scope(|s| {
        let handles: Vec<_> = nodes
            .iter()
            .map(|(location, instruction)| s.spawn(move || call(client, phase, location, instruction)))
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(RpcError::Unexpected("dispatch thread panicked".into())))
            })
            .collect()
    });
    for ((location, _), result) in nodes.iter().zip(results) {
        result.map_err(|e| (location.clone(), e))?;
    }
    Ok(())
}
