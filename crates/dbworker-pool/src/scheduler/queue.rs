//! Waiting list and eligibility table
//!
//! The waiting list keeps unassigned tasks in submission order. The
//! eligibility table pins a resource to the one worker currently allowed to
//! run tasks for it.

use crate::scheduler::{ResourceKey, Task, WorkerId};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Ordered queue of tasks not yet handed to a worker
#[derive(Debug, Default)]
pub struct WaitingList {
    tasks: VecDeque<Task>,
}

impl WaitingList {
    /// Create an empty waiting list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task at the tail
    pub fn push(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Position of the first task, in submission order, matching `eligible`
    pub fn position<F>(&self, mut eligible: F) -> Option<usize>
    where
        F: FnMut(&Task) -> bool,
    {
        self.tasks.iter().position(|task| eligible(task))
    }

    /// Remove the task at `index`, keeping the order of the others
    pub fn remove(&mut self, index: usize) -> Option<Task> {
        self.tasks.remove(index)
    }

    /// Remove every waiting task
    pub fn drain(&mut self) -> Vec<Task> {
        self.tasks.drain(..).collect()
    }

    /// Number of waiting tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if no task is waiting
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Resource key -> worker currently allowed to run tasks for it
#[derive(Debug, Default)]
pub struct EligibilityTable {
    owners: FxHashMap<ResourceKey, WorkerId>,
}

impl EligibilityTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker pinned to `key`, if any
    pub fn owner(&self, key: ResourceKey) -> Option<WorkerId> {
        self.owners.get(&key).copied()
    }

    /// Check whether `worker` may run a task for `key`.
    ///
    /// Tasks without a key are never constrained.
    pub fn allows(&self, key: Option<ResourceKey>, worker: WorkerId) -> bool {
        match key {
            None => true,
            Some(key) => match self.owner(key) {
                Some(owner) => owner == worker,
                None => true,
            },
        }
    }

    /// Pin `key` to `worker`
    pub fn pin(&mut self, key: ResourceKey, worker: WorkerId) {
        self.owners.insert(key, worker);
    }

    /// Release the pin on `key`
    pub fn release(&mut self, key: ResourceKey) -> Option<WorkerId> {
        self.owners.remove(&key)
    }

    /// Number of pinned resources
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Check if no resource is pinned
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
