//! Database Worker Pool
//!
//! This crate provides a bounded worker-pool scheduler for short-lived
//! database operations:
//! - FIFO ordering of operations addressed to the same database
//! - Sticky assignment of a database to one worker while a transaction is open
//! - A sequential single-thread pool for the one-worker case
//! - TOML-backed pool configuration

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod scheduler;

pub use config::{ConfigError, PoolConfig};
pub use scheduler::{
    create_pool, PoolStats, Resource, ResourceKey, Scheduler, SequentialPool, Task, TaskId,
    TaskOutcome, TaskPool, Work, WorkerId, WorkerState,
};

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A task was posted before `start()`
    #[error("Pool '{0}' has not been started")]
    NotStarted(String),

    /// A task was posted after `quit()`
    #[error("Pool '{0}' has been shut down")]
    ShutDown(String),

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Invalid pool configuration
    #[error("Invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Worker pool result
pub type PoolResult<T> = Result<T, PoolError>;
