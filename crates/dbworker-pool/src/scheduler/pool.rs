//! Pool interface shared by the multi-worker scheduler and the sequential pool

use crate::config::PoolConfig;
use crate::scheduler::task::Work;
use crate::scheduler::{Resource, Scheduler, SequentialPool, Task};
use crate::PoolResult;

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks accepted by `post`
    pub tasks_posted: u64,

    /// Tasks sent to a worker's mailbox. The sequential pool sends each
    /// task at submission, so waiting tasks are already counted here.
    pub tasks_dispatched: u64,

    /// Tasks whose work returned normally
    pub tasks_completed: u64,

    /// Tasks whose work panicked
    pub tasks_panicked: u64,

    /// Waiting tasks dropped by `quit`
    pub tasks_discarded: u64,

    /// Calls to the assignment routine
    pub assign_attempts: u64,

    /// Tasks currently waiting for a worker
    pub waiting: usize,

    /// Workers currently executing a task
    pub busy_workers: usize,
}

/// Lifecycle of a pool
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    /// Constructed, workers not yet spawned
    Created,
    /// Workers running, accepting tasks
    Running,
    /// `quit()` was called
    Stopped,
}

/// A pool of workers executing database tasks
pub trait TaskPool: Send + Sync {
    /// Pool name, used in thread names and logs
    fn name(&self) -> &str;

    /// Number of worker threads
    fn worker_count(&self) -> usize;

    /// Spawn the worker threads. Starting a running pool is a no-op.
    fn start(&self) -> PoolResult<()>;

    /// Stop accepting tasks and signal every worker to exit.
    ///
    /// Tasks already running are allowed to finish; tasks still waiting are
    /// dropped without running.
    fn quit(&self);

    /// Submit a task
    fn post(&self, task: Task) -> PoolResult<()>;

    /// Submit work for a resource handle
    fn post_for(&self, resource: &dyn Resource, work: Work) -> PoolResult<()> {
        self.post(Task::for_resource(resource, work))
    }

    /// Check if the pool accepts tasks
    fn is_running(&self) -> bool;

    /// Get pool statistics
    fn stats(&self) -> PoolStats;
}

/// Build the pool described by `config`.
///
/// A single-worker configuration gets a [`SequentialPool`]; anything larger
/// gets a [`Scheduler`]. The pool is returned unstarted.
pub fn create_pool(config: &PoolConfig) -> PoolResult<Box<dyn TaskPool>> {
    config.validate()?;

    let pool: Box<dyn TaskPool> = if config.resolved_worker_count() == 1 {
        Box::new(SequentialPool::with_config(config))
    } else {
        Box::new(Scheduler::with_config(config))
    };

    tracing::debug!(
        pool = pool.name(),
        workers = pool.worker_count(),
        "created task pool"
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolError;

    #[test]
    fn test_create_sequential_pool() {
        let config = PoolConfig {
            worker_count: 1,
            ..PoolConfig::default()
        };
        let pool = create_pool(&config).unwrap();
        assert_eq!(pool.worker_count(), 1);
        assert!(!pool.is_running());
    }

    #[test]
    fn test_create_multi_worker_pool() {
        let config = PoolConfig {
            name: "multi".to_string(),
            worker_count: 3,
            ..PoolConfig::default()
        };
        let pool = create_pool(&config).unwrap();
        assert_eq!(pool.name(), "multi");
        assert_eq!(pool.worker_count(), 3);
    }

    #[test]
    fn test_create_pool_rejects_invalid_config() {
        let config = PoolConfig {
            name: String::new(),
            ..PoolConfig::default()
        };
        let err = create_pool(&config).err().unwrap();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn test_post_for_samples_resource() {
        struct Handle;
        impl Resource for Handle {
            fn resource_key(&self) -> Option<crate::ResourceKey> {
                Some(9.into())
            }
            fn is_in_transaction(&self) -> bool {
                false
            }
        }

        let pool = create_pool(&PoolConfig::default()).unwrap();
        let err = pool.post_for(&Handle, Box::new(|| {})).unwrap_err();
        assert!(matches!(err, PoolError::NotStarted(_)));
    }
}
