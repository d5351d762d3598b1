use quarry_core::prelude::TaskId;
use quarry_exec::RpcError;
use quarry_plan::PlanError;
use thiserror::Error;

use crate::dispatch::Phase;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("task {task_id} failed to compile: {source}")]
    Compile {
        task_id: TaskId,
        #[source]
        source: PlanError,
    },

    #[error("task {task_id}: {phase} failed on {location}: {source}")]
    Dispatch {
        task_id: TaskId,
        phase: Phase,
        location: String,
        #[source]
        source: RpcError,
    },

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("task {task_id} is {status}, expected {expected}")]
    InvalidState {
        task_id: TaskId,
        status: String,
        expected: &'static str,
    },

    #[error("executor rpc: {0}")]
    Rpc(#[from] RpcError),
}

pub type Result<T> = std::result::Result<T, SchedError>;
