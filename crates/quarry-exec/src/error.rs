use quarry_core::prelude::TaskId;
use quarry_plan::PlanError;
use quarry_split::SplitError;
use thiserror::Error;

/// Failures inside an operator's streaming loop.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("split stream: {0}")]
    Split(#[from] SplitError),

    #[error("expression: {0}")]
    Expr(#[from] PlanError),

    #[error("table provider: {0}")]
    Provider(String),

    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("local sort buffered more than {limit} rows")]
    SortLimit { limit: usize },

    #[error("execution error: {0}")]
    Exec(String),
}

impl From<quarry_core::Error> for OpError {
    fn from(e: quarry_core::Error) -> Self {
        OpError::Schema(e.to_string())
    }
}

/// Transport-level failures of the executor protocol.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc io: {0}")]
    Io(#[from] std::io::Error),

    #[error("rpc codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("rpc frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("connection closed by peer")]
    Closed,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("bad payload: {0}")]
    Payload(String),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{op} not allowed in state {state}")]
    InvalidState { op: &'static str, state: String },

    #[error("instruction: {0}")]
    Instruction(#[from] PlanError),

    #[error("instruction for {expected} delivered to {actual}")]
    WrongExecutor { expected: String, actual: String },

    #[error("executor holds task {held:?}, request names {requested}")]
    TaskMismatch {
        held: Option<TaskId>,
        requested: TaskId,
    },

    #[error("no output slot for reader {0}")]
    UnknownReader(String),

    #[error("output to {0} was never attached")]
    Unattached(String),

    #[error("input {location}: {source}")]
    Peer {
        location: String,
        #[source]
        source: RpcError,
    },

    #[error("no results held for {0}")]
    NoResults(TaskId),

    #[error("executor io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Split(#[from] SplitError),
}
