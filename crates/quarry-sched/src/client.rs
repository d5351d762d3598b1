//! Scheduler-side view of an executor.

use quarry_core::prelude::{Location, TaskId};
use quarry_exec::rpc::{self, Request};
use quarry_exec::{RpcError, StatusReport};
use quarry_plan::Instruction;
use quarry_split::Split;

/// One method per executor RPC. Implementations must be safe to call from
/// several dispatch threads at once.
pub trait ExecutorClient: Send + Sync {
    fn send_instruction(&self, location: &Location, instruction: &Instruction) -> Result<(), RpcError>;

    fn setup_writers(&self, location: &Location) -> Result<(), RpcError>;

    fn setup_readers(&self, location: &Location) -> Result<(), RpcError>;

    fn run(&self, location: &Location) -> Result<(), RpcError>;

    fn abort(&self, location: &Location, task_id: TaskId) -> Result<(), RpcError>;

    fn status(&self, location: &Location) -> Result<StatusReport, RpcError>;

    fn fetch_results(&self, location: &Location, task_id: TaskId) -> Result<Split, RpcError>;
}

/// Talks to `ExecutorServer`s over TCP, one connection per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpExecutorClient;

impl TcpExecutorClient {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutorClient for TcpExecutorClient {
    fn send_instruction(&self, location: &Location, instruction: &Instruction) -> Result<(), RpcError> {
        rpc::call(
            location,
            &Request::SendInstruction {
                instruction: instruction.clone(),
            },
        )?
        .into_ack()
    }

    fn setup_writers(&self, location: &Location) -> Result<(), RpcError> {
        rpc::call(location, &Request::SetupWriters)?.into_ack()
    }

    fn setup_readers(&self, location: &Location) -> Result<(), RpcError> {
        rpc::call(location, &Request::SetupReaders)?.into_ack()
    }

    fn run(&self, location: &Location) -> Result<(), RpcError> {
        rpc::call(location, &Request::Run)?.into_ack()
    }

    fn abort(&self, location: &Location, task_id: TaskId) -> Result<(), RpcError> {
        rpc::call(location, &Request::Abort { task_id })?.into_ack()
    }

    fn status(&self, location: &Location) -> Result<StatusReport, RpcError> {
        rpc::call(location, &Request::Status)?.into_status()
    }

    fn fetch_results(&self, location: &Location, task_id: TaskId) -> Result<Split, RpcError> {
        rpc::call(location, &Request::FetchResults { task_id })?.into_results()
    }
}
