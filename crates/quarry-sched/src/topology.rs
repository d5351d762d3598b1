//! The coordinator's view of the cluster.
//!
//! Liveness is owned by whatever feeds the topology (heartbeats, a config
//! file, a test); the scheduler only reads it.

use parking_lot::RwLock;
use quarry_core::prelude::Location;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub location: Location,
    /// 0 = healthy; anything else keeps the executor out of allocation.
    pub status: i32,
}

impl ExecutorInfo {
    pub fn healthy(location: Location) -> Self {
        Self {
            location,
            status: 0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == 0
    }
}

pub trait Topology: Send + Sync {
    /// Current executors in a stable order.
    fn executors(&self) -> Vec<ExecutorInfo>;
}

/// Fixed executor list with settable status.
#[derive(Debug, Default)]
pub struct StaticTopology {
    executors: RwLock<Vec<ExecutorInfo>>,
}

impl StaticTopology {
    pub fn new(locations: impl IntoIterator<Item = Location>) -> Self {
        Self {
            executors: RwLock::new(locations.into_iter().map(ExecutorInfo::healthy).collect()),
        }
    }

    /// Returns `false` if no executor is called `name`.
    pub fn set_status(&self, name: &str, status: i32) -> bool {
        let mut executors = self.executors.write();
        match executors.iter_mut().find(|e| e.location.name == name) {
            Some(e) => {
                e.status = status;
                true
            }
            None => false,
        }
    }
}

impl Topology for StaticTopology {
    fn executors(&self) -> Vec<ExecutorInfo> {
        self.executors.read().clone()
    }
}
