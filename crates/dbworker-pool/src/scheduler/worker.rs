//! Worker threads that execute Tasks
//!
//! A worker runs at most one task at a time. The pool hands it a task through
//! its mailbox; after the task returns (or panics) the worker reports back
//! through its idle callback and waits for the next message.

use crate::scheduler::task::TaskOutcome;
use crate::scheduler::{ResourceKey, Task};
use crossbeam::channel::{Receiver, Sender};
use std::fmt;
use std::io;
use std::thread;

/// Stable handle of a worker inside its pool
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Create a WorkerId from its index in the pool
    pub fn new(index: usize) -> Self {
        WorkerId(index)
    }

    /// Index of the worker in the pool
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a Worker
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a task
    Idle,
    /// Executing a task
    Busy,
}

/// Message delivered to a worker thread
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// Execute this task
    Run(Task),
    /// Stop after the current message
    Shutdown,
}

/// Scheduling view of a worker, owned by the pool state
pub struct Worker {
    /// Worker ID
    id: WorkerId,

    /// Idle or busy
    state: WorkerState,

    /// Resource of the most recently dispatched task
    last_resource: Option<ResourceKey>,

    /// Transaction flag of the most recently dispatched task
    last_in_transaction: bool,

    /// Sending half of the worker thread's mailbox
    mailbox: Sender<WorkerMessage>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, mailbox: Sender<WorkerMessage>) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            last_resource: None,
            last_in_transaction: false,
            mailbox,
        }
    }

    /// Get the worker ID
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Check if the worker can take a task
    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    /// Resource of the last task handed to this worker
    pub fn last_resource(&self) -> Option<ResourceKey> {
        self.last_resource
    }

    /// Transaction flag of the last task handed to this worker
    pub fn last_in_transaction(&self) -> bool {
        self.last_in_transaction
    }

    /// Send a task to the thread, then mark busy and remember its resource.
    ///
    /// Returns false, leaving the worker idle, if the mailbox is closed.
    pub(crate) fn dispatch(&mut self, task: Task) -> bool {
        let resource = task.resource();
        let in_transaction = task.in_transaction();

        if let Err(err) = self.mailbox.send(WorkerMessage::Run(task)) {
            // The thread only drops its mailbox after a shutdown message
            tracing::warn!(worker = %self.id, task = ?err.0, "worker mailbox closed, task dropped");
            return false;
        }

        self.state = WorkerState::Busy;
        self.last_resource = resource;
        self.last_in_transaction = in_transaction;
        true
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = WorkerState::Idle;
    }

    /// Ask the thread to exit once it is done with its current task
    pub(crate) fn stop(&self) {
        // A closed mailbox means the thread is already gone
        let _ = self.mailbox.send(WorkerMessage::Shutdown);
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("last_resource", &self.last_resource)
            .field("last_in_transaction", &self.last_in_transaction)
            .finish()
    }
}

/// OS thread backing a worker
pub(crate) struct WorkerThread {
    /// Worker ID
    id: WorkerId,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerThread {
    /// Start the worker thread.
    ///
    /// `on_idle` is called on the worker thread after every task, including
    /// tasks that panicked.
    pub(crate) fn spawn<F>(
        name: String,
        id: WorkerId,
        stack_size: Option<usize>,
        mailbox: Receiver<WorkerMessage>,
        on_idle: F,
    ) -> io::Result<Self>
    where
        F: Fn(WorkerId, TaskOutcome) + Send + 'static,
    {
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        let handle = builder.spawn(move || WorkerThread::run_loop(id, mailbox, on_idle))?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Worker thread main loop
    fn run_loop<F>(id: WorkerId, mailbox: Receiver<WorkerMessage>, on_idle: F)
    where
        F: Fn(WorkerId, TaskOutcome),
    {
        tracing::trace!(worker = %id, "worker started");

        while let Ok(message) = mailbox.recv() {
            match message {
                WorkerMessage::Run(task) => {
                    tracing::trace!(
                        worker = %id,
                        task = %task.id(),
                        resource = ?task.resource(),
                        "running task"
                    );
                    let outcome = task.run();
                    on_idle(id, outcome);
                }
                WorkerMessage::Shutdown => break,
            }
        }

        tracing::trace!(worker = %id, "worker shutting down");
    }

    /// Get the worker ID
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Wait for the thread to exit.
    ///
    /// A worker that calls this on itself is not joined; it exits on its own
    /// once the current task returns.
    pub(crate) fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            tracing::error!(worker = %self.id, "worker thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::time::Duration;

    #[test]
    fn test_worker_creation() {
        let (tx, _rx) = unbounded();
        let worker = Worker::new(WorkerId::new(3), tx);

        assert_eq!(worker.id(), WorkerId::new(3));
        assert!(worker.is_idle());
        assert_eq!(worker.last_resource(), None);
        assert!(!worker.last_in_transaction());
    }

    #[test]
    fn test_worker_dispatch_records_last_task() {
        let (tx, rx) = unbounded();
        let mut worker = Worker::new(WorkerId::new(0), tx);

        assert!(worker.dispatch(Task::new(Some(4.into()), true, || {})));

        assert_eq!(worker.state(), WorkerState::Busy);
        assert_eq!(worker.last_resource(), Some(ResourceKey::new(4)));
        assert!(worker.last_in_transaction());
        assert!(matches!(rx.try_recv(), Ok(WorkerMessage::Run(_))));

        worker.mark_idle();
        assert!(worker.is_idle());
        // Last-task fields survive until the next dispatch
        assert_eq!(worker.last_resource(), Some(ResourceKey::new(4)));
    }

    #[test]
    fn test_worker_dispatch_to_closed_mailbox() {
        let (tx, rx) = unbounded();
        drop(rx);
        let mut worker = Worker::new(WorkerId::new(0), tx);

        assert!(!worker.dispatch(Task::new(Some(4.into()), true, || {})));
        assert!(worker.is_idle());
        assert_eq!(worker.last_resource(), None);
        assert!(!worker.last_in_transaction());
    }

    #[test]
    fn test_worker_thread_runs_tasks_and_reports_idle() {
        let (tx, rx) = unbounded();
        let (idle_tx, idle_rx) = unbounded();

        let mut thread = WorkerThread::spawn(
            "test-worker-0".to_string(),
            WorkerId::new(0),
            None,
            rx,
            move |id, outcome| {
                idle_tx.send((id, outcome)).unwrap();
            },
        )
        .unwrap();

        tx.send(WorkerMessage::Run(Task::unbound(|| {}))).unwrap();
        tx.send(WorkerMessage::Run(Task::unbound(|| panic!("expected"))))
            .unwrap();

        let first = idle_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, (WorkerId::new(0), TaskOutcome::Completed));

        let second = idle_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second, (WorkerId::new(0), TaskOutcome::Panicked));

        tx.send(WorkerMessage::Shutdown).unwrap();
        thread.join();
        assert_eq!(thread.id(), WorkerId::new(0));
    }

    #[test]
    fn test_worker_thread_exits_when_mailbox_closes() {
        let (tx, rx) = unbounded();
        let mut thread = WorkerThread::spawn(
            "test-worker-1".to_string(),
            WorkerId::new(1),
            Some(64 * 1024),
            rx,
            |_, _| {},
        )
        .unwrap();

        drop(tx);
        thread.join();
    }
}
