//! Database Task Scheduler
//!
//! Assigns database tasks to a fixed set of worker threads. Tasks for the
//! same database run one at a time in submission order; a database with an
//! open transaction stays pinned to the worker that opened it.

mod pool;
mod queue;
#[allow(clippy::module_inception)]
mod scheduler;
mod sequential;
mod task;
mod worker;

pub use pool::{create_pool, PoolStats, TaskPool};
pub use queue::{EligibilityTable, WaitingList};
pub use scheduler::Scheduler;
pub use sequential::SequentialPool;
pub use task::{Resource, ResourceKey, Task, TaskId, TaskOutcome, Work};
pub use worker::{Worker, WorkerId, WorkerState};
