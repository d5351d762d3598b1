//! In-process `ExecutorClient` that records calls instead of sending them.
//!
//! Executors report `Running` for the last task they were sent until told
//! otherwise with `set_state` or `restart`.

use std::collections::HashMap;

use parking_lot::Mutex;
use quarry_core::prelude::{Location, TaskId};
use quarry_exec::{ExecutorState, RpcError, StatusReport};
use quarry_plan::Instruction;
use quarry_split::Split;

use crate::client::ExecutorClient;
use crate::dispatch::Phase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Dispatch(Phase, String),
    Abort(String, TaskId),
    Status(String),
    FetchResults(String, TaskId),
}

impl Call {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Call::Dispatch(p, _) => Some(*p),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<(Phase, String)>>,
    states: Mutex<HashMap<String, StatusReport>>,
    results: Mutex<HashMap<String, Split>>,
    assigned: Mutex<HashMap<String, TaskId>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make `phase` fail on the executor called `name`.
    pub fn fail_on(&self, phase: Phase, name: &str) {
        self.failures.lock().push((phase, name.to_string()));
    }

    pub fn set_state(&self, name: &str, state: ExecutorState, error: Option<&str>) {
        self.states.lock().insert(
            name.to_string(),
            StatusReport {
                task_id: None,
                state,
                error: error.map(str::to_string),
            },
        );
    }

    pub fn set_all(&self, locations: &[Location], state: ExecutorState) {
        for l in locations {
            self.set_state(&l.name, state, None);
        }
    }

    /// The executor called `name` comes back empty, as after a restart.
    pub fn restart(&self, name: &str) {
        self.assigned.lock().remove(name);
        self.set_state(name, ExecutorState::Idle, None);
    }

    pub fn set_results(&self, name: &str, split: Split) {
        self.results.lock().insert(name.to_string(), split);
    }

    fn phase(&self, phase: Phase, location: &Location) -> Result<(), RpcError> {
        self.calls
            .lock()
            .push(Call::Dispatch(phase, location.name.clone()));
        let fail = self
            .failures
            .lock()
            .iter()
            .any(|(p, n)| *p == phase && *n == location.name);
        if fail {
            Err(RpcError::Remote(format!("{phase} refused by {}", location.name)))
        } else {
            Ok(())
        }
    }
}

impl ExecutorClient for RecordingClient {
    fn send_instruction(&self, location: &Location, instruction: &Instruction) -> Result<(), RpcError> {
        self.phase(Phase::SendInstruction, location)?;
        self.assigned
            .lock()
            .insert(location.name.clone(), instruction.task_id);
        Ok(())
    }

    fn setup_writers(&self, location: &Location) -> Result<(), RpcError> {
        self.phase(Phase::SetupWriters, location)
    }

    fn setup_readers(&self, location: &Location) -> Result<(), RpcError> {
        self.phase(Phase::SetupReaders, location)
    }

    fn run(&self, location: &Location) -> Result<(), RpcError> {
        self.phase(Phase::Run, location)
    }

    fn abort(&self, location: &Location, task_id: TaskId) -> Result<(), RpcError> {
        self.calls
            .lock()
            .push(Call::Abort(location.name.clone(), task_id));
        Ok(())
    }

    fn status(&self, location: &Location) -> Result<StatusReport, RpcError> {
        self.calls.lock().push(Call::Status(location.name.clone()));
        let mut report = self
            .states
            .lock()
            .get(&location.name)
            .cloned()
            .unwrap_or(StatusReport {
                task_id: None,
                state: ExecutorState::Running,
                error: None,
            });
        report.task_id = self.assigned.lock().get(&location.name).copied();
        Ok(report)
    }

    fn fetch_results(&self, location: &Location, task_id: TaskId) -> Result<Split, RpcError> {
        self.calls
            .lock()
            .push(Call::FetchResults(location.name.clone(), task_id));
        self.results
            .lock()
            .get(&location.name)
            .cloned()
            .ok_or_else(|| RpcError::Remote(format!("no results on {}", location.name)))
    }
}
