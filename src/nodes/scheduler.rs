//! Asynchronous scheduling primitives
//!
//! A scheduled node runs as a chain of [`TaskStep`]s. Steps with
//! [`Affinity::Any`] may run on the worker pool; [`Affinity::Pipeline`] steps
//! touch the device and run on the thread that owns the graph.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::node::NodeId;

/// Where a task step is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Any,
    Pipeline,
}

/// One link of a node's task chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    /// Read graph parameter overrides into the node
    ResolveParameters,
    /// Run `process` if inputs are satisfied
    Process,
    /// Drive an embedded graph to completion and collect its outputs
    AwaitInner,
    /// Give back intermediate buffers of an embedded graph
    ReleaseBuffers,
}

impl TaskStep {
    pub fn affinity(self) -> Affinity {
        match self {
            TaskStep::ResolveParameters => Affinity::Any,
            TaskStep::Process | TaskStep::AwaitInner | TaskStep::ReleaseBuffers => Affinity::Pipeline,
        }
    }
}

/// FIFO of nodes awaiting evaluation, at most one entry per node
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: VecDeque<NodeId>,
    pending: HashSet<NodeId>,
}

impl Scheduler {
    /// Queue a node. Returns false when it is already pending.
    pub fn schedule(&mut self, node: &str) -> bool {
        if !self.pending.insert(node.to_string()) {
            return false;
        }
        self.queue.push_back(node.to_string());
        true
    }

    pub fn is_scheduled(&self, node: &str) -> bool {
        self.pending.contains(node)
    }

    /// Drop a pending entry, e.g. when its node is removed
    pub fn cancel(&mut self, node: &str) {
        if self.pending.remove(node) {
            self.queue.retain(|id| id != node);
        }
    }

    /// Take every pending node for one evaluation round
    pub fn take_round(&mut self) -> Vec<NodeId> {
        self.pending.clear();
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Shareable `is_processing` flag of a graph
#[derive(Debug, Clone, Default)]
pub struct ProcessingStatus(Arc<AtomicBool>);

impl ProcessingStatus {
    pub fn is_processing(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, processing: bool) {
        self.0.store(processing, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_deduplicated() {
        let mut scheduler = Scheduler::default();
        assert!(scheduler.schedule("a"));
        assert!(scheduler.schedule("b"));
        assert!(!scheduler.schedule("a"));
        assert_eq!(scheduler.len(), 2);

        let round = scheduler.take_round();
        assert_eq!(round, vec!["a".to_string(), "b".to_string()]);
        assert!(scheduler.is_empty());

        // a new round accepts the node again
        assert!(scheduler.schedule("a"));
    }

    #[test]
    fn test_cancel() {
        let mut scheduler = Scheduler::default();
        scheduler.schedule("a");
        scheduler.schedule("b");
        scheduler.cancel("a");
        assert!(!scheduler.is_scheduled("a"));
        assert_eq!(scheduler.take_round(), vec!["b".to_string()]);
    }

    #[test]
    fn test_step_affinity() {
        assert_eq!(TaskStep::ResolveParameters.affinity(), Affinity::Any);
        assert_eq!(TaskStep::Process.affinity(), Affinity::Pipeline);
        assert_eq!(TaskStep::AwaitInner.affinity(), Affinity::Pipeline);
    }

    #[test]
    fn test_status_is_shared() {
        let status = ProcessingStatus::default();
        let observer = status.clone();
        status.set(true);
        assert!(observer.is_processing());
        status.set(false);
        assert!(!observer.is_processing());
    }
}
