#![forbid(unsafe_code)]
//! quarry-sched: the coordinator side of quarry.
//!
//! - `task`: tasks and the priority-ordered task list.
//! - `topology`: the cluster view the scheduler allocates from.
//! - `sizing`: largest parallelism that fits the free executors.
//! - `dispatch`: the four-phase handshake that wires a plan onto executors.
//! - `client`: how the scheduler talks to executors.
//! - `scheduler`: admission, allocation and task lifecycle.
//! - `testing`: an in-process recording client.

pub mod client;
pub mod dispatch;
pub mod error;
pub mod scheduler;
pub mod sizing;
pub mod task;
pub mod testing;
pub mod topology;

pub use client::{ExecutorClient, TcpExecutorClient};
pub use dispatch::{dispatch, DispatchFailure, Phase};
pub use error::{Result, SchedError};
pub use scheduler::{RunOutcome, Scheduler};
pub use sizing::max_parallelism;
pub use task::{Task, TaskList, TaskStatus};
pub use topology::{ExecutorInfo, StaticTopology, Topology};
