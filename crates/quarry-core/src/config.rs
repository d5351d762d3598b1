//! Engine configuration shared by the coordinator and the executors.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the scheduler issues the RPCs of one dispatch phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchMode {
    /// One node after another, in plan order.
    Sequential,
    /// All nodes of a phase at once; the phase barrier still holds.
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lower bound of the parallelism search.
    pub min_parallelism: usize,

    /// Upper bound of the parallelism search.
    pub max_parallelism: usize,

    pub dispatch_mode: DispatchMode,

    /// Send `Abort` to already-contacted executors and return every allocated
    /// executor to the free pool when a dispatch phase fails.
    pub abort_on_dispatch_failure: bool,

    /// Rows per framed batch on split streams.
    pub split_batch_rows: usize,

    /// Cap on rows buffered by the local order-by operator. `None` = unbounded.
    pub sort_buffer_limit_rows: Option<usize>,

    /// Root directory of the csv table provider.
    pub data_root: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_parallelism: 1,
            max_parallelism: 1000,
            dispatch_mode: DispatchMode::Sequential,
            abort_on_dispatch_failure: true,
            split_batch_rows: 10_000,
            sort_buffer_limit_rows: None,
            data_root: "./data".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `QUARRY_MIN_PARALLELISM` / `QUARRY_MAX_PARALLELISM`: sizing search bounds
    /// - `QUARRY_DISPATCH_MODE`: `sequential` or `parallel`
    /// - `QUARRY_ABORT_ON_DISPATCH_FAILURE`: `true` / `false`
    /// - `QUARRY_SPLIT_BATCH_ROWS`: rows per framed batch
    /// - `QUARRY_SORT_BUFFER_LIMIT_ROWS`: local sort cap
    /// - `QUARRY_DATA_ROOT`: csv table root
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("QUARRY_MIN_PARALLELISM") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.min_parallelism = v;
            }
        }

        if let Ok(s) = std::env::var("QUARRY_MAX_PARALLELISM") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_parallelism = v;
            }
        }

        if let Ok(s) = std::env::var("QUARRY_DISPATCH_MODE") {
            match s.to_ascii_lowercase().as_str() {
                "parallel" => cfg.dispatch_mode = DispatchMode::Parallel,
                "sequential" => cfg.dispatch_mode = DispatchMode::Sequential,
                _ => {}
            }
        }

        if let Ok(s) = std::env::var("QUARRY_ABORT_ON_DISPATCH_FAILURE") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.abort_on_dispatch_failure = v;
            }
        }

        if let Ok(s) = std::env::var("QUARRY_SPLIT_BATCH_ROWS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.split_batch_rows = v;
            }
        }

        if let Ok(s) = std::env::var("QUARRY_SORT_BUFFER_LIMIT_ROWS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.sort_buffer_limit_rows = Some(v);
            }
        }

        if let Ok(s) = std::env::var("QUARRY_DATA_ROOT") {
            cfg.data_root = s;
        }

        cfg
    }

    /// Reject configurations the scheduler cannot search over.
    pub fn validate(&self) -> Result<()> {
        if self.min_parallelism == 0 {
            return Err(Error::Config("min_parallelism must be at least 1".into()));
        }
        if self.max_parallelism < self.min_parallelism {
            return Err(Error::Config(format!(
                "max_parallelism {} is below min_parallelism {}",
                self.max_parallelism, self.min_parallelism
            )));
        }
        if self.split_batch_rows == 0 {
            return Err(Error::Config("split_batch_rows must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.min_parallelism, 1);
        assert_eq!(cfg.max_parallelism, 1000);
        assert!(cfg.abort_on_dispatch_failure);
        cfg.validate().unwrap();
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let cfg = EngineConfig {
            min_parallelism: 8,
            max_parallelism: 2,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = EngineConfig {
            dispatch_mode: DispatchMode::Parallel,
            sort_buffer_limit_rows: Some(64),
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dispatch_mode, DispatchMode::Parallel);
        assert_eq!(back.sort_buffer_limit_rows, Some(64));
    }
}
