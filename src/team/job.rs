//! # Job: one function invocation handed to a team.

use std::fmt;
use std::sync::Arc;

use crate::core::{FlowNode, ProcessId, ThreadId, ThreadState};

/// A (function, thread state, argument) tuple submitted to a [`Team`](crate::Team).
///
/// Immutable once submitted and not clonable: whichever worker accepts it
/// calls [`Job::run`] exactly once. Dropping a job without running it (e.g.
/// after reporting back-pressure) has no side effects; the kernel keeps its
/// own reference to the pending flow.
pub struct Job {
    thread: Arc<ThreadState>,
    node: Arc<FlowNode>,
}

impl Job {
    pub(crate) fn new(thread: Arc<ThreadState>, node: Arc<FlowNode>) -> Self {
        Self { thread, node }
    }

    /// Name of the function this job executes.
    pub fn function(&self) -> &str {
        &self.node.function.name
    }

    /// Process the job belongs to.
    pub fn process_id(&self) -> ProcessId {
        self.thread.process.id
    }

    /// Thread state the job belongs to.
    pub fn thread_id(&self) -> ThreadId {
        self.thread.id
    }

    /// Executes the function with its thread state's execution rights.
    ///
    /// The job may park instead of executing when a bound object is still
    /// pending; the thread state re-submits it once the object is ready.
    pub fn run(self) {
        let Job { thread, node } = self;
        thread.execute(node);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("function", &self.function())
            .field("process", &self.process_id())
            .field("thread", &self.thread_id())
            .finish()
    }
}
