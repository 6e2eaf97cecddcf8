//! Task structure and execution

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Opaque unit of work carried by a Task
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Identifier of the logical resource (database) a Task operates on
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(u64);

impl ResourceKey {
    /// Create a key from a database handle id
    pub fn new(id: u64) -> Self {
        ResourceKey(id)
    }

    /// Get the numeric key value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ResourceKey {
    fn from(id: u64) -> Self {
        ResourceKey(id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db#{}", self.0)
    }
}

/// A resource handle that can describe itself to the pool.
///
/// Both methods are called exactly once, when the work is posted.
pub trait Resource {
    /// Key of the resource, or `None` if the work is not bound to one
    fn resource_key(&self) -> Option<ResourceKey>;

    /// Whether the resource has a transaction open
    fn is_in_transaction(&self) -> bool;
}

/// Per-pool submission sequence number
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a Task's work ended
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The work returned normally
    Completed,
    /// The work panicked; the panic was caught at the worker boundary
    Panicked,
}

/// A unit of work with an optional resource key and a transaction flag
pub struct Task {
    /// Sequence number, assigned when the pool accepts the task
    id: TaskId,

    /// Resource the work operates on (None = unconstrained)
    resource: Option<ResourceKey>,

    /// Keep the resource pinned to the executing worker after completion
    in_transaction: bool,

    /// Work to execute
    work: Work,
}

impl Task {
    /// Create a new Task
    pub fn new<F>(resource: Option<ResourceKey>, in_transaction: bool, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: TaskId::default(),
            resource,
            in_transaction,
            work: Box::new(work),
        }
    }

    /// Create a Task that may run on any worker
    pub fn unbound<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(None, false, work)
    }

    /// Create a Task from a resource handle, sampling its key and
    /// transaction state once
    pub fn for_resource(resource: &dyn Resource, work: Work) -> Self {
        Self {
            id: TaskId::default(),
            resource: resource.resource_key(),
            in_transaction: resource.is_in_transaction(),
            work,
        }
    }

    /// Get the Task's sequence number
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: TaskId) {
        self.id = id;
    }

    /// Get the resource key
    pub fn resource(&self) -> Option<ResourceKey> {
        self.resource
    }

    /// Check whether the task keeps its resource pinned after completion
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Run the work, catching any panic so the worker survives it
    pub fn run(self) -> TaskOutcome {
        let Task { id, resource, work, .. } = self;
        match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(()) => TaskOutcome::Completed,
            Err(payload) => {
                tracing::error!(
                    task = %id,
                    resource = ?resource,
                    panic = panic_message(payload.as_ref()),
                    "task panicked"
                );
                TaskOutcome::Panicked
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Handle {
        id: u64,
        in_transaction: bool,
    }

    impl Resource for Handle {
        fn resource_key(&self) -> Option<ResourceKey> {
            Some(ResourceKey::new(self.id))
        }

        fn is_in_transaction(&self) -> bool {
            self.in_transaction
        }
    }

    #[test]
    fn test_task_creation() {
        let task = Task::new(Some(7.into()), true, || {});
        assert_eq!(task.resource(), Some(ResourceKey::new(7)));
        assert!(task.in_transaction());
        assert_eq!(task.id(), TaskId::default());
    }

    #[test]
    fn test_unbound_task() {
        let task = Task::unbound(|| {});
        assert_eq!(task.resource(), None);
        assert!(!task.in_transaction());
    }

    #[test]
    fn test_task_from_resource() {
        let handle = Handle {
            id: 3,
            in_transaction: true,
        };
        let task = Task::for_resource(&handle, Box::new(|| {}));
        assert_eq!(task.resource(), Some(ResourceKey::new(3)));
        assert!(task.in_transaction());
    }

    #[test]
    fn test_task_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let task = Task::unbound(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(task.run(), TaskOutcome::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_task_panic_is_caught() {
        let task = Task::new(Some(1.into()), false, || panic!("boom"));
        assert_eq!(task.run(), TaskOutcome::Panicked);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn test_resource_key_display() {
        assert_eq!(ResourceKey::new(12).to_string(), "db#12");
        assert_eq!(ResourceKey::from(12).as_u64(), 12);
    }
}
