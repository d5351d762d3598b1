#![forbid(unsafe_code)]
//! quarry-exec: everything that runs inside one executor process.
//!
//! - `executor`: the per-instruction state machine
//!   (`Idle → Received → WritersReady → ReadersReady → Running → Done | Failed`).
//! - `operators`: streaming operators built from a decoded `ENodeKind`.
//! - `io`: split sources/sinks, input fan-in and output routing.
//! - `provider`: `TableProvider` plus in-memory and csv implementations.
//! - `rpc` / `server`: the length-prefixed JSON protocol and the TCP listener
//!   that serves both control calls and split streams.

pub mod error;
pub mod executor;
pub mod io;
pub mod operators;
pub mod provider;
pub mod rpc;
pub mod server;

pub use error::{ExecError, OpError, RpcError};
pub use executor::{Executor, ExecutorState, StatusReport};
pub use provider::{CsvTableProvider, MemoryTableProvider, TableProvider};
pub use rpc::{Request, Response};
pub use server::{ExecutorServer, ServerHandle};
