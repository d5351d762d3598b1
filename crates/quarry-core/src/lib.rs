#![forbid(unsafe_code)]
//! quarry-core: shared vocabulary for the coordinator and the executors.
//!
//! Everything here is plain data: identifiers, executor [`Location`]s, the
//! [`Value`] scalar, split [`Metadata`] and the [`EngineConfig`]. No I/O and
//! no threads live in this crate.

pub mod config;
pub mod error;
pub mod id;
pub mod location;
pub mod prelude;
pub mod schema;
pub mod types;

pub use config::{DispatchMode, EngineConfig};
pub use error::{Error, Result};
pub use id::TaskId;
pub use location::Location;
pub use schema::{DataType, Field, Metadata};
pub use types::Value;

/// Crate version, logged by the binary at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
