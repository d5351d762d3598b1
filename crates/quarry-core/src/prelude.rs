//! Convenient re-exports for downstream crates.

pub use crate::config::{DispatchMode, EngineConfig};
pub use crate::error::{Error, Result};
pub use crate::id::TaskId;
pub use crate::location::Location;
pub use crate::schema::{DataType, Field, Metadata};
pub use crate::types::{OrderType, Value};
