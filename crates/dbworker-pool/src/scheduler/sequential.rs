//! Single-worker pool
//!
//! With one worker there is nothing to arbitrate: a FIFO channel drained by
//! one thread already runs every task in submission order, so resource
//! keys and transaction flags are carried but never consulted.

use crate::config::PoolConfig;
use crate::scheduler::pool::Lifecycle;
use crate::scheduler::task::TaskOutcome;
use crate::scheduler::worker::{WorkerMessage, WorkerThread};
use crate::scheduler::{PoolStats, Task, TaskId, TaskPool, WorkerId};
use crate::{PoolError, PoolResult};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

struct SequentialState {
    lifecycle: Lifecycle,
    next_task_id: u64,
    mailbox: Option<Sender<WorkerMessage>>,
    inbox: Option<Receiver<WorkerMessage>>,
    stats: PoolStats,
}

impl SequentialState {
    fn finished(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.stats.tasks_completed += 1,
            TaskOutcome::Panicked => self.stats.tasks_panicked += 1,
        }
    }

    fn stats(&self) -> PoolStats {
        let finished =
            self.stats.tasks_completed + self.stats.tasks_panicked + self.stats.tasks_discarded;
        let in_flight = self.stats.tasks_dispatched.saturating_sub(finished) as usize;
        let busy_workers = in_flight.min(1);
        PoolStats {
            waiting: in_flight - busy_workers,
            busy_workers,
            ..self.stats
        }
    }
}

/// Pool running every task on one thread, in submission order
pub struct SequentialPool {
    name: String,
    stack_size: Option<usize>,
    state: Arc<Mutex<SequentialState>>,
    thread: Mutex<Option<WorkerThread>>,
}

impl SequentialPool {
    /// Create an unstarted sequential pool
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(&PoolConfig {
            name: name.into(),
            worker_count: 1,
            ..PoolConfig::default()
        })
    }

    /// Create a sequential pool from a pool configuration.
    ///
    /// `worker_count` is ignored.
    pub fn with_config(config: &PoolConfig) -> Self {
        Self {
            name: config.name.clone(),
            stack_size: config.stack_size,
            state: Arc::new(Mutex::new(SequentialState {
                lifecycle: Lifecycle::Created,
                next_task_id: 1,
                mailbox: None,
                inbox: None,
                stats: PoolStats::default(),
            })),
            thread: Mutex::new(None),
        }
    }
}

impl TaskPool for SequentialPool {
    fn name(&self) -> &str {
        &self.name
    }

    fn worker_count(&self) -> usize {
        1
    }

    fn start(&self) -> PoolResult<()> {
        PoolConfig {
            name: self.name.clone(),
            worker_count: 1,
            stack_size: self.stack_size,
        }
        .validate()?;

        let mut thread = self.thread.lock();
        let mut state = self.state.lock();

        match state.lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Stopped => return Err(PoolError::ShutDown(self.name.clone())),
            Lifecycle::Created => {}
        }

        let (mailbox, inbox) = channel::unbounded();
        let shared = Arc::clone(&self.state);
        let worker = WorkerThread::spawn(
            format!("{}-worker-0", self.name),
            WorkerId::new(0),
            self.stack_size,
            inbox.clone(),
            move |_, outcome| shared.lock().finished(outcome),
        )?;

        *thread = Some(worker);
        state.mailbox = Some(mailbox);
        state.inbox = Some(inbox);
        state.lifecycle = Lifecycle::Running;

        tracing::info!(pool = %self.name, "sequential pool started");
        Ok(())
    }

    fn quit(&self) {
        let discarded: Vec<Task> = {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Stopped {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;

            // Pull back whatever the worker has not picked up yet
            let discarded: Vec<Task> = state
                .inbox
                .take()
                .map(|inbox| {
                    inbox
                        .try_iter()
                        .filter_map(|message| match message {
                            WorkerMessage::Run(task) => Some(task),
                            WorkerMessage::Shutdown => None,
                        })
                        .collect()
                })
                .unwrap_or_default();
            state.stats.tasks_discarded += discarded.len() as u64;

            if let Some(mailbox) = state.mailbox.take() {
                let _ = mailbox.send(WorkerMessage::Shutdown);
            }
            discarded
        };

        tracing::info!(
            pool = %self.name,
            discarded = discarded.len(),
            "sequential pool shutting down"
        );
        drop(discarded);

        if let Some(thread) = self.thread.lock().as_mut() {
            thread.join();
        }
    }

    fn post(&self, mut task: Task) -> PoolResult<()> {
        let mut state = self.state.lock();
        match state.lifecycle {
            Lifecycle::Created => return Err(PoolError::NotStarted(self.name.clone())),
            Lifecycle::Stopped => return Err(PoolError::ShutDown(self.name.clone())),
            Lifecycle::Running => {}
        }

        let id = TaskId::from_u64(state.next_task_id);
        state.next_task_id += 1;
        task.set_id(id);

        let Some(mailbox) = state.mailbox.as_ref() else {
            return Err(PoolError::ShutDown(self.name.clone()));
        };
        if mailbox.send(WorkerMessage::Run(task)).is_err() {
            return Err(PoolError::ShutDown(self.name.clone()));
        }

        state.stats.tasks_posted += 1;
        state.stats.tasks_dispatched += 1;
        tracing::trace!(pool = %self.name, task = %id, "task posted");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.lock().lifecycle == Lifecycle::Running
    }

    fn stats(&self) -> PoolStats {
        self.state.lock().stats()
    }
}

impl Drop for SequentialPool {
    fn drop(&mut self) {
        self.quit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sequential_pool_runs_in_order() {
        let pool = SequentialPool::new("seq");
        pool.start().unwrap();

        let (tx, rx) = channel::unbounded();
        for i in 0..50u64 {
            let tx = tx.clone();
            let key = Some((i % 3).into());
            pool.post(Task::new(key, i % 2 == 0, move || tx.send(i).unwrap()))
                .unwrap();
        }

        let order: Vec<u64> = (0..50)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());

        pool.quit();
        let stats = pool.stats();
        assert_eq!(stats.tasks_posted, 50);
        assert_eq!(stats.tasks_completed, 50);
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.waiting, 0);
    }

    #[test]
    fn test_sequential_pool_lifecycle_errors() {
        let pool = SequentialPool::new("seq");
        assert!(matches!(
            pool.post(Task::unbound(|| {})),
            Err(PoolError::NotStarted(_))
        ));

        pool.start().unwrap();
        pool.start().unwrap();
        assert!(pool.is_running());

        pool.quit();
        assert!(!pool.is_running());
        assert!(matches!(
            pool.post(Task::unbound(|| {})),
            Err(PoolError::ShutDown(_))
        ));
        pool.quit();
    }

    #[test]
    fn test_sequential_pool_survives_panic() {
        let pool = SequentialPool::new("seq");
        pool.start().unwrap();

        let (tx, rx) = channel::unbounded();
        pool.post(Task::unbound(|| panic!("expected"))).unwrap();
        pool.post(Task::unbound(move || tx.send(()).unwrap())).unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.quit();
        assert_eq!(pool.stats().tasks_panicked, 1);
        assert_eq!(pool.stats().tasks_completed, 1);
    }

    #[test]
    fn test_sequential_pool_quit_discards_waiting() {
        let pool = SequentialPool::new("seq");
        pool.start().unwrap();

        let (gate_tx, gate_rx) = channel::bounded::<()>(0);
        let (started_tx, started_rx) = channel::unbounded();
        pool.post(Task::unbound(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..3 {
            pool.post(Task::unbound(|| {})).unwrap();
        }
        assert_eq!(pool.stats().waiting, 3);
        assert_eq!(pool.stats().busy_workers, 1);

        // Release the running task from another thread once quit is underway
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let _ = gate_tx.send(());
        });
        pool.quit();
        releaser.join().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.tasks_discarded, 3);
        assert_eq!(stats.tasks_completed, 1);
        // Every task went to the worker's mailbox when posted
        assert_eq!(stats.tasks_dispatched, 4);
    }

    #[test]
    fn test_sequential_pool_start_rejects_invalid_config() {
        let pool = SequentialPool::new("db\0x");
        let err = pool.start().unwrap_err();
        assert!(matches!(
            err,
            PoolError::Config(crate::ConfigError::Validation(_))
        ));
        assert!(!pool.is_running());
        assert!(matches!(
            pool.post(Task::unbound(|| {})),
            Err(PoolError::NotStarted(_))
        ));

        let pool = SequentialPool::with_config(&PoolConfig {
            stack_size: Some(1024),
            ..PoolConfig::default()
        });
        assert!(matches!(pool.start(), Err(PoolError::Config(_))));
    }
}
