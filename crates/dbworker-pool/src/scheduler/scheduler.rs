//! Multi-worker scheduler with per-resource ordering and transaction pinning
//!
//! All bookkeeping lives in one [`SchedulerState`] behind a single mutex.
//! Workers receive tasks through their mailboxes and run them outside the
//! lock; when a task returns, the worker re-enters the lock to report idle.
//!
//! Assignment is event driven: a worker is only reconsidered when a task is
//! posted or when some worker goes idle. There is no polling.

use crate::config::PoolConfig;
use crate::scheduler::pool::Lifecycle;
use crate::scheduler::queue::{EligibilityTable, WaitingList};
use crate::scheduler::task::TaskOutcome;
use crate::scheduler::worker::{WorkerMessage, WorkerThread};
use crate::scheduler::{PoolStats, ResourceKey, Task, TaskId, TaskPool, Worker, WorkerId};
use crate::{PoolError, PoolResult};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Scheduling state shared by the pool and its worker threads
pub(crate) struct SchedulerState {
    /// Whether tasks are accepted and dispatched
    lifecycle: Lifecycle,

    /// Next task sequence number
    next_task_id: u64,

    /// Tasks not yet handed to a worker, in submission order
    waiting: WaitingList,

    /// Resource -> worker allowed to run it
    eligibility: EligibilityTable,

    /// Worker arena, indexed by WorkerId
    workers: Vec<Worker>,

    /// Counters
    stats: PoolStats,
}

impl SchedulerState {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Created,
            next_task_id: 1,
            waiting: WaitingList::new(),
            eligibility: EligibilityTable::new(),
            workers: Vec::new(),
            stats: PoolStats::default(),
        }
    }

    /// Register a worker reachable through `mailbox`
    pub(crate) fn add_worker(&mut self, mailbox: Sender<WorkerMessage>) -> WorkerId {
        let id = WorkerId::new(self.workers.len());
        self.workers.push(Worker::new(id, mailbox));
        id
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    /// Owned snapshot of the idle worker ids
    fn idle_workers(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|worker| worker.is_idle())
            .map(Worker::id)
            .collect()
    }

    /// Queue a task and offer work to every idle worker
    pub(crate) fn post(&mut self, mut task: Task) -> TaskId {
        let id = TaskId::from_u64(self.next_task_id);
        self.next_task_id += 1;
        task.set_id(id);

        tracing::trace!(
            task = %id,
            resource = ?task.resource(),
            in_transaction = task.in_transaction(),
            "task posted"
        );

        self.stats.tasks_posted += 1;
        self.waiting.push(task);

        for worker in self.idle_workers() {
            self.try_assign(worker);
        }

        id
    }

    /// Hand `worker` the first waiting task it is eligible to run.
    ///
    /// Returns false if the worker stays idle.
    pub(crate) fn try_assign(&mut self, worker: WorkerId) -> bool {
        self.stats.assign_attempts += 1;

        if self.lifecycle != Lifecycle::Running {
            return false;
        }

        match self.workers.get(worker.index()) {
            Some(slot) if slot.is_idle() => {}
            _ => return false,
        }

        let Some(index) = self.find_eligible_task(worker) else {
            return false;
        };
        let Some(task) = self.waiting.remove(index) else {
            return false;
        };

        let task_id = task.id();
        let resource = task.resource();
        if !self.workers[worker.index()].dispatch(task) {
            self.stats.tasks_discarded += 1;
            return false;
        }

        if let Some(key) = resource {
            self.eligibility.pin(key, worker);
        }

        tracing::trace!(
            worker = %worker,
            task = %task_id,
            resource = ?resource,
            "task assigned"
        );

        self.stats.tasks_dispatched += 1;
        true
    }

    /// Index of the first waiting task `worker` may run.
    ///
    /// The list is scanned front to back and tasks pinned to other workers
    /// are skipped, so a later task for a resource can never overtake an
    /// earlier one for the same resource.
    pub(crate) fn find_eligible_task(&self, worker: WorkerId) -> Option<usize> {
        let eligibility = &self.eligibility;
        self.waiting
            .position(|task| eligibility.allows(task.resource(), worker))
    }

    /// Bookkeeping after `worker` finished its task
    pub(crate) fn on_worker_idle(&mut self, worker: WorkerId, outcome: TaskOutcome) {
        let previously_idle = self.idle_workers();

        let Some(slot) = self.workers.get_mut(worker.index()) else {
            tracing::warn!(worker = %worker, "idle report from unknown worker");
            return;
        };
        slot.mark_idle();

        match outcome {
            TaskOutcome::Completed => self.stats.tasks_completed += 1,
            TaskOutcome::Panicked => self.stats.tasks_panicked += 1,
        }

        if !slot.last_in_transaction() {
            if let Some(key) = slot.last_resource() {
                self.eligibility.release(key);
            }
        }

        self.try_assign(worker);

        // A released pin may unblock tasks for any other idle worker
        for idle in previously_idle {
            self.try_assign(idle);
        }
    }

    /// Drop every waiting task and tell the workers to exit
    pub(crate) fn shut_down(&mut self) -> Vec<Task> {
        self.lifecycle = Lifecycle::Stopped;
        for worker in &self.workers {
            worker.stop();
        }

        let discarded = self.waiting.drain();
        self.stats.tasks_discarded += discarded.len() as u64;
        discarded
    }

    /// Worker currently pinned to `key`
    pub(crate) fn owner_of(&self, key: ResourceKey) -> Option<WorkerId> {
        self.eligibility.owner(key)
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            waiting: self.waiting.len(),
            busy_workers: self.workers.iter().filter(|w| !w.is_idle()).count(),
            ..self.stats
        }
    }
}

/// State reachable from worker threads
struct Shared {
    name: String,
    state: Mutex<SchedulerState>,
}

impl Shared {
    fn worker_idle(&self, worker: WorkerId, outcome: TaskOutcome) {
        self.state.lock().on_worker_idle(worker, outcome);
    }
}

/// Multi-worker task scheduler
pub struct Scheduler {
    /// State shared with the workers
    shared: Arc<Shared>,

    /// Worker threads, populated by `start()`
    threads: Mutex<Vec<WorkerThread>>,

    /// Number of worker threads
    worker_count: usize,

    /// Worker thread stack size
    stack_size: Option<usize>,
}

impl Scheduler {
    /// Create a new scheduler with the specified number of workers.
    /// If worker_count is 0, defaults to the number of CPU cores.
    pub fn new(worker_count: usize) -> Self {
        Self::with_config(&PoolConfig {
            worker_count,
            ..PoolConfig::default()
        })
    }

    /// Create a scheduler from a pool configuration
    pub fn with_config(config: &PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                state: Mutex::new(SchedulerState::new()),
            }),
            threads: Mutex::new(Vec::new()),
            worker_count: config.resolved_worker_count(),
            stack_size: config.stack_size,
        }
    }

    /// Worker currently pinned to the resource `key`, if any
    pub fn owner_of(&self, key: ResourceKey) -> Option<WorkerId> {
        self.shared.state.lock().owner_of(key)
    }

    fn config(&self) -> PoolConfig {
        PoolConfig {
            name: self.shared.name.clone(),
            worker_count: self.worker_count,
            stack_size: self.stack_size,
        }
    }

    fn spawn_workers(
        &self,
        state: &mut SchedulerState,
        threads: &mut Vec<WorkerThread>,
    ) -> std::io::Result<()> {
        for index in 0..self.worker_count {
            let (mailbox, inbox) = channel::unbounded();
            let shared = Arc::clone(&self.shared);

            let thread = WorkerThread::spawn(
                format!("{}-worker-{}", self.shared.name, index),
                WorkerId::new(index),
                self.stack_size,
                inbox,
                move |worker, outcome| shared.worker_idle(worker, outcome),
            )?;

            let id = state.add_worker(mailbox);
            debug_assert_eq!(id, thread.id());
            threads.push(thread);
        }
        Ok(())
    }
}

impl TaskPool for Scheduler {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn worker_count(&self) -> usize {
        self.worker_count
    }

    fn start(&self) -> PoolResult<()> {
        self.config().validate()?;

        let mut threads = self.threads.lock();
        let mut state = self.shared.state.lock();

        match state.lifecycle() {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Stopped => return Err(PoolError::ShutDown(self.shared.name.clone())),
            Lifecycle::Created => {}
        }

        if let Err(err) = self.spawn_workers(&mut state, &mut threads) {
            tracing::error!(pool = %self.shared.name, error = %err, "failed to start workers");
            state.shut_down();
            drop(state);
            for thread in threads.iter_mut() {
                thread.join();
            }
            return Err(err.into());
        }

        state.set_lifecycle(Lifecycle::Running);
        tracing::info!(
            pool = %self.shared.name,
            workers = self.worker_count,
            "scheduler started"
        );
        Ok(())
    }

    fn quit(&self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            if state.lifecycle() == Lifecycle::Stopped {
                return;
            }
            state.shut_down()
        };

        tracing::info!(
            pool = %self.shared.name,
            discarded = discarded.len(),
            "scheduler shutting down"
        );
        // Drop the discarded work outside the lock
        drop(discarded);

        for thread in self.threads.lock().iter_mut() {
            thread.join();
        }
    }

    fn post(&self, task: Task) -> PoolResult<()> {
        let mut state = self.shared.state.lock();
        match state.lifecycle() {
            Lifecycle::Created => Err(PoolError::NotStarted(self.shared.name.clone())),
            Lifecycle::Stopped => Err(PoolError::ShutDown(self.shared.name.clone())),
            Lifecycle::Running => {
                state.post(task);
                Ok(())
            }
        }
    }

    fn is_running(&self) -> bool {
        self.shared.state.lock().lifecycle() == Lifecycle::Running
    }

    fn stats(&self) -> PoolStats {
        self.shared.state.lock().stats()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.quit();
    }
}
