//! Runtime configuration
//!
//! Pool sizing thresholds and per-server settings. Defaults are the
//! values the relay has always shipped with.

use std::time::Duration;

use crate::error::AppError;

/// Minimum number of workers at start and at any point
pub const MIN_WORKERS: usize = 4;

/// Maximum number of workers
pub const MAX_WORKERS: usize = 32;

/// Minimum queue/worker difference before the pool is resized
pub const TOLERANCE: usize = 4;

/// Listen backlog
pub const LISTEN_BACKLOG: u32 = 4;

/// How often a serving worker drains its rooms when the client is quiet
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Autoscaling thresholds for the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub tolerance: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: MIN_WORKERS,
            max_workers: MAX_WORKERS,
            tolerance: TOLERANCE,
        }
    }
}

/// Settings shared by the listener and every worker
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port reported in HELO and JOIN replies
    pub port: u16,
    pub backlog: u32,
    /// Identifier reported in HELO replies
    pub student_id: String,
    pub drain_interval: Duration,
}

impl ServerConfig {
    /// Create a config for the given port with default settings
    pub fn new(port: u16) -> Self {
        Self {
            port,
            backlog: LISTEN_BACKLOG,
            student_id: "16336617".to_string(),
            drain_interval: DRAIN_INTERVAL,
        }
    }

    /// Parse the port argument
    pub fn from_port_arg(arg: &str) -> Result<Self, AppError> {
        arg.trim()
            .parse::<u16>()
            .map(Self::new)
            .map_err(|_| AppError::InvalidPort(arg.to_string()))
    }
}
