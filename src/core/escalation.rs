//! # Escalation routing.
//!
//! A failure is offered to the nearest handler first and moves outward only
//! when nobody handles it:
//!
//! ```text
//! Function   runtime closures, then declared handler functions of the failing function
//!    │         (a handler function replaces the rest of the failed flow)
//!    ▼
//! Flow       completion callback of the enclosing sub-/spawned flow
//!    │         (sub-flow ─► Function level of the invoking function)
//!    ▼
//! Thread     kernel-wide thread handler functions
//!    ▼
//! Process    invocation (or kernel) process handler
//!    ▼
//! Kernel     record as the process failure, abandon the process
//! ```
//!
//! A handler that rethrows restarts routing one level above itself. Every
//! escalation reaches exactly one handling level; that level publishes
//! `EscalationHandled`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use super::flow::{Branch, BranchParent, FlowNode, Found, Step};
use super::shared::find_binding;
use super::thread::ThreadState;
use crate::error::{Escalation, panic_message};
use crate::events::{Event, EventKind};
use crate::function::EscalationHandler;

/// Level of the escalation chain that handled a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EscalationLevel {
    /// A handler of the failing function.
    Function,
    /// The completion callback of the enclosing flow.
    Flow,
    /// A kernel-wide thread handler function.
    Thread,
    /// The process handler.
    Process,
    /// Nobody handled it; recorded as the process failure.
    Kernel,
}

impl EscalationLevel {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationLevel::Function => "function",
            EscalationLevel::Flow => "flow",
            EscalationLevel::Thread => "thread",
            EscalationLevel::Process => "process",
            EscalationLevel::Kernel => "kernel",
        }
    }
}

/// Routing position of an escalation in flight.
pub(crate) enum Level {
    Function(Arc<FlowNode>),
    Flow(Arc<Branch>),
    Thread,
    Process,
    Kernel,
}

impl ThreadState {
    /// Routes `escalation` starting at `level`.
    ///
    /// On return the stack holds whatever continues the thread (a handler
    /// invocation, the remainder of an enclosing flow, or nothing).
    pub(crate) fn escalate(self: &Arc<Self>, mut escalation: Escalation, mut level: Level) {
        loop {
            level = match level {
                Level::Function(node) => {
                    if !node.skip_handlers {
                        match node.find_handler(&escalation) {
                            Some(Found::Function(handler)) => {
                                self.unwind_to(&node.branch);
                                self.handled(EscalationLevel::Function, &escalation);
                                self.push_handler(handler, escalation, Arc::clone(&node.branch));
                                return;
                            }
                            Some(Found::Closure(handler)) => match call_handler(&handler, &escalation) {
                                Ok(()) => {
                                    self.unwind_to(&node.branch);
                                    self.handled(EscalationLevel::Function, &escalation);
                                    return;
                                }
                                Err(rethrown) => escalation = rethrown,
                            },
                            None => {}
                        }
                    }
                    Level::Flow(Arc::clone(&node.branch))
                }
                Level::Flow(branch) => {
                    self.unwind_through(&branch);
                    if let Some(callback) = branch.take_callback() {
                        match callback.call(Some(escalation.clone())) {
                            Ok(()) => {
                                self.handled(EscalationLevel::Flow, &escalation);
                                return;
                            }
                            Err(rethrown) => escalation = rethrown,
                        }
                    }
                    branch.parent.level()
                }
                Level::Thread => {
                    self.discard_all();
                    if let Some(handler) = find_binding(&self.shared().thread_handlers, &escalation) {
                        let branch = Branch::new(BranchParent::Process, None);
                        self.push(Step::Complete(Arc::clone(&branch)));
                        self.handled(EscalationLevel::Thread, &escalation);
                        self.push_handler(handler, escalation, branch);
                        return;
                    }
                    Level::Process
                }
                Level::Process => {
                    self.discard_all();
                    if let Some(handler) = self.process.handler() {
                        match call_handler(handler, &escalation) {
                            Ok(()) => {
                                self.handled(EscalationLevel::Process, &escalation);
                                return;
                            }
                            Err(rethrown) => escalation = rethrown,
                        }
                    }
                    Level::Kernel
                }
                Level::Kernel => {
                    self.discard_all();
                    self.handled(EscalationLevel::Kernel, &escalation);
                    self.process.fail(escalation);
                    return;
                }
            };
        }
    }

    fn push_handler(&self, function: usize, escalation: Escalation, branch: Arc<Branch>) {
        let meta = Arc::clone(&self.shared().functions[function]);
        self.push(Step::Run(FlowNode::handler(meta, escalation, branch)));
    }

    fn handled(&self, level: EscalationLevel, escalation: &Escalation) {
        self.publish(
            Event::new(EventKind::EscalationHandled)
                .with_level(level)
                .with_reason(escalation.to_string()),
        );
    }
}

fn call_handler(handler: &EscalationHandler, escalation: &Escalation) -> Result<(), Escalation> {
    catch_unwind(AssertUnwindSafe(|| handler(escalation))).unwrap_or_else(|panic| {
        Err(Escalation::Panicked {
            function: "escalation handler".into(),
            message: panic_message(&*panic).into(),
        })
    })
}
