#![forbid(unsafe_code)]
//! quarry: a distributed query engine with a priority scheduler, phased
//! executor dispatch and streaming split execution.
//!
//! This facade only re-exports the workspace crates so integration tests and
//! embedders can depend on a single package.

pub use quarry_core as core;
pub use quarry_exec as exec;
pub use quarry_plan as plan;
pub use quarry_sched as sched;
pub use quarry_split as split;
