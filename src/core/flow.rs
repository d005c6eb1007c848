//! # Flow nodes, branches and the thread stack.
//!
//! A thread state executes a stack of [`Step`]s. Each pending function call
//! is a [`FlowNode`]; each flow with its own completion boundary (the entry
//! flow, a sub-flow, a spawned flow, a thread-level handler) is a [`Branch`]
//! whose `Complete` marker sits below the branch's nodes.
//!
//! ```text
//! top ─► Run(S1)            sub-flow 1 of F
//!        Complete(b1)       b1.parent = Invoker(F)
//!        Run(S2)            sub-flow 2 of F
//!        Complete(b2)
//!        Run(next of F)     same branch as F
//!        Complete(b0)       entry branch, parent = Thread
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use super::escalation::Level;
use super::shared::{FunctionMeta, find_binding};
use crate::error::Escalation;
use crate::function::{Argument, EscalationHandler, EscalationMatcher, FlowCallback};
use crate::object::ObjectArena;

pub(crate) enum Step {
    Run(Arc<FlowNode>),
    Complete(Arc<Branch>),
}

/// Where an escalation goes once it leaves a branch unhandled.
pub(crate) enum BranchParent {
    /// Sub-flow: the requesting function's handlers.
    Invoker(Arc<FlowNode>),
    /// Entry or spawned flow: the kernel's thread handlers.
    Thread,
    /// Thread-level handler flow: the process handler.
    Process,
}

impl BranchParent {
    pub fn level(&self) -> Level {
        match self {
            BranchParent::Invoker(node) => Level::Function(Arc::clone(node)),
            BranchParent::Thread => Level::Thread,
            BranchParent::Process => Level::Process,
        }
    }
}

pub(crate) struct Branch {
    pub parent: BranchParent,
    callback: Mutex<Option<FlowCallback>>,
}

impl Branch {
    pub fn new(parent: BranchParent, callback: Option<FlowCallback>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            callback: Mutex::new(callback),
        })
    }

    /// Takes the callback; it runs at most once.
    pub fn take_callback(&self) -> Option<FlowCallback> {
        self.callback.lock().take()
    }
}

/// Handler chosen for an escalation at the function level.
pub(crate) enum Found {
    Function(usize),
    Closure(EscalationHandler),
}

pub(crate) struct FlowNode {
    pub function: Arc<FunctionMeta>,
    pub argument: Argument,
    pub branch: Arc<Branch>,
    /// Set for handler invocations; their failures skip function-level handlers.
    pub skip_handlers: bool,
    /// Function-scoped containers of this invocation.
    pub objects: ObjectArena,
    runtime_handlers: Mutex<Vec<(EscalationMatcher, EscalationHandler)>>,
}

impl FlowNode {
    pub fn new(function: Arc<FunctionMeta>, argument: Argument, branch: Arc<Branch>) -> Arc<Self> {
        Self::build(function, argument, branch, false)
    }

    /// A handler function invocation receiving `escalation` as its argument.
    pub fn handler(function: Arc<FunctionMeta>, escalation: Escalation, branch: Arc<Branch>) -> Arc<Self> {
        Self::build(function, Argument::new(escalation), branch, true)
    }

    fn build(function: Arc<FunctionMeta>, argument: Argument, branch: Arc<Branch>, skip_handlers: bool) -> Arc<Self> {
        Arc::new(Self {
            function,
            argument,
            branch,
            skip_handlers,
            objects: ObjectArena::new(0),
            runtime_handlers: Mutex::new(Vec::new()),
        })
    }

    pub fn add_handler(&self, matcher: EscalationMatcher, handler: EscalationHandler) {
        self.runtime_handlers.lock().push((matcher, handler));
    }

    /// Runtime handlers first, then the declared ones.
    pub fn find_handler(&self, escalation: &Escalation) -> Option<Found> {
        let runtime = self
            .runtime_handlers
            .lock()
            .iter()
            .find(|(m, _)| m.matches(escalation))
            .map(|(_, h)| Arc::clone(h));
        if let Some(handler) = runtime {
            return Some(Found::Closure(handler));
        }
        find_binding(&self.function.handlers, escalation).map(Found::Function)
    }
}
