//! # ThreadState: one sequential strand of a process.
//!
//! A thread state owns a stack of steps (see [`flow`](super::flow)) and is
//! driven by whichever OS thread currently holds its execution right:
//!
//! ```text
//!  advance() ──pop Run(node)──► team.submit(Job) ──► worker: execute(node)
//!     ▲                                                   │
//!     │        ┌── objects ready ── run body ── push continuations ──┐
//!     │        ├── object pending ── push node back, PARK ◄── resume()│
//!     │        └── failure ──────── escalate() ──────────────────────┤
//!     └──────────────────────────────────────────────────────────────┘
//!  stack empty ─► recycle thread objects ─► process.thread_completed()
//! ```
//!
//! Exactly one job per thread state is in flight at a time, so functions of
//! one thread never overlap. A thread never blocks an OS thread while waiting:
//! it parks, and the container that becomes ready resumes it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

use super::escalation::Level;
use super::flow::{Branch, BranchParent, FlowNode, Step};
use super::process::ProcessState;
use super::shared::Shared;
use super::ThreadId;
use crate::error::{Escalation, panic_message};
use crate::events::{Event, EventKind};
use crate::function::{FlowRequests, FunctionContext};
use crate::object::{CleanupEscalation, Container, ObjectArena, Readiness, Scope, recycle_scope};
use crate::team::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Parked,
    Complete,
}

struct Inner {
    stack: Vec<Step>,
    status: Status,
    /// A wake-up arrived while active; the next park resumes immediately.
    wake_pending: bool,
    /// Unhandled recycle failures of function scopes, forwarded at thread end.
    cleanups: Vec<CleanupEscalation>,
}

pub(crate) struct ThreadState {
    pub id: ThreadId,
    pub process: Arc<ProcessState>,
    objects: ObjectArena,
    inner: Mutex<Inner>,
}

impl ThreadState {
    /// Creates a thread state for `node`'s flow and starts advancing it.
    pub fn start(process: &Arc<ProcessState>, node: Arc<FlowNode>) {
        let thread = Arc::new(ThreadState {
            id: process.shared.next_thread_id(),
            process: Arc::clone(process),
            objects: ObjectArena::new(0),
            inner: Mutex::new(Inner {
                stack: vec![Step::Complete(Arc::clone(&node.branch)), Step::Run(Arc::clone(&node))],
                status: Status::Active,
                wake_pending: false,
                cleanups: Vec::new(),
            }),
        });
        process.register_thread(&thread);
        thread.publish(Event::new(EventKind::ThreadSpawned).with_function(Arc::clone(&node.function.name)));
        thread.advance();
    }

    pub fn shared(&self) -> &Shared {
        &self.process.shared
    }

    pub(super) fn publish(&self, event: Event) {
        self.shared().publish(
            event
                .with_process(self.process.id.get())
                .with_thread(self.id.get()),
        );
    }

    /// Drives the stack until a job is handed to a team or the stack is empty.
    pub fn advance(self: &Arc<Self>) {
        loop {
            if self.process.is_abandoned() {
                self.discard_all();
            }
            let step = self.inner.lock().stack.pop();
            match step {
                None => {
                    self.complete();
                    return;
                }
                Some(Step::Complete(branch)) => {
                    if let Some(callback) = branch.take_callback() {
                        if let Err(escalation) = callback.call(None) {
                            self.escalate(escalation, branch.parent.level());
                        }
                    }
                }
                Some(Step::Run(node)) => {
                    let entry = &self.shared().teams[node.function.team];
                    match entry.team.submit(Job::new(Arc::clone(self), Arc::clone(&node))) {
                        Ok(()) => return,
                        Err(declined) => {
                            self.publish(
                                Event::new(EventKind::BackPressure)
                                    .with_function(Arc::clone(&node.function.name))
                                    .with_team(Arc::clone(&entry.name))
                                    .with_reason(declined.reason()),
                            );
                            let escalation = Escalation::BackPressure {
                                team: Arc::clone(&entry.name),
                                function: Arc::clone(&node.function.name),
                                reason: declined.reason().into(),
                            };
                            // A resumed node may already own function-scoped objects.
                            self.end_function_scope(&node);
                            self.escalate(escalation, Level::Function(node));
                        }
                    }
                }
            }
        }
    }

    /// Runs one function invocation on the calling (team worker) thread.
    pub fn execute(self: &Arc<Self>, node: Arc<FlowNode>) {
        if self.process.is_abandoned() {
            self.end_function_scope(&node);
            self.advance();
            return;
        }

        let function = Arc::clone(&node.function);
        let mut objects = Vec::with_capacity(function.objects.len());
        for &object in &function.objects {
            let container = self.container(object, &node);
            match container.check_ready(self) {
                Readiness::Ready(instance) => objects.push(instance),
                Readiness::Pending(waiting_on) => {
                    self.park(node, waiting_on);
                    return;
                }
                Readiness::Failed(escalation) => {
                    self.end_function_scope(&node);
                    self.escalate(escalation, Level::Function(node));
                    self.advance();
                    return;
                }
            }
        }

        self.publish(
            Event::new(EventKind::FunctionStarting)
                .with_function(Arc::clone(&node.function.name))
                .with_team(Arc::clone(&self.shared().teams[node.function.team].name)),
        );

        let mut ctx = FunctionContext::new(&node, &objects, self.process.id, self.id);
        let outcome = catch_unwind(AssertUnwindSafe(|| node.function.body.execute(&mut ctx)));
        let requests = ctx.into_requests();

        drop(objects);
        self.end_function_scope(&node);

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(Escalation::from(error)),
            Err(panic) => Some(Escalation::Panicked {
                function: Arc::clone(&node.function.name),
                message: panic_message(&*panic).into(),
            }),
        };
        match failure {
            None => {
                self.publish(Event::new(EventKind::FunctionCompleted).with_function(Arc::clone(&node.function.name)));
                self.continue_flow(&node, requests);
            }
            Some(escalation) => {
                self.publish(
                    Event::new(EventKind::FunctionFailed)
                        .with_function(Arc::clone(&node.function.name))
                        .with_reason(escalation.to_string()),
                );
                self.escalate(escalation, Level::Function(node));
            }
        }
        self.advance();
    }

    /// Wakes a parked thread (or flags an active one).
    pub fn resume(self: &Arc<Self>) {
        let run = {
            let mut inner = self.inner.lock();
            match inner.status {
                Status::Parked => {
                    inner.status = Status::Active;
                    true
                }
                Status::Active => {
                    inner.wake_pending = true;
                    false
                }
                Status::Complete => false,
            }
        };
        if run {
            self.publish(Event::new(EventKind::ThreadResumed));
            self.advance();
        }
    }

    /// Applies the requests of a successful invocation.
    fn continue_flow(self: &Arc<Self>, node: &Arc<FlowNode>, requests: FlowRequests) {
        let shared = self.shared();
        for spawn in requests.spawns {
            let branch = Branch::new(BranchParent::Thread, spawn.callback);
            let child = FlowNode::new(Arc::clone(&shared.functions[spawn.function]), spawn.argument, branch);
            ThreadState::start(&self.process, child);
        }

        let mut inner = self.inner.lock();
        if let Some(next) = node.function.next {
            let argument = requests.next.unwrap_or_default();
            inner.stack.push(Step::Run(FlowNode::new(
                Arc::clone(&shared.functions[next]),
                argument,
                Arc::clone(&node.branch),
            )));
        }
        for sub in requests.sub_flows.into_iter().rev() {
            let branch = Branch::new(BranchParent::Invoker(Arc::clone(node)), sub.callback);
            inner.stack.push(Step::Complete(Arc::clone(&branch)));
            inner.stack.push(Step::Run(FlowNode::new(
                Arc::clone(&shared.functions[sub.function]),
                sub.argument,
                branch,
            )));
        }
    }

    fn park(self: &Arc<Self>, node: Arc<FlowNode>, waiting_on: Arc<str>) {
        let function = Arc::clone(&node.function.name);
        let resume_now = {
            let mut inner = self.inner.lock();
            inner.stack.push(Step::Run(node));
            if std::mem::take(&mut inner.wake_pending) {
                true
            } else {
                inner.status = Status::Parked;
                self.publish(
                    Event::new(EventKind::ThreadParked)
                        .with_function(function)
                        .with_object(waiting_on),
                );
                false
            }
        };
        if resume_now {
            self.advance();
        }
    }

    /// Container of `object` for this invocation, created on first use.
    fn container(&self, object: usize, node: &FlowNode) -> Arc<Container> {
        let meta = &self.shared().objects[object];
        let arena = match meta.scope {
            Scope::Function => &node.objects,
            Scope::Thread => &self.objects,
            Scope::Process => &self.process.objects,
        };
        if let Some(existing) = arena.get(object) {
            return existing;
        }
        let dependencies = meta
            .dependencies
            .iter()
            .map(|&dep| self.container(dep, node))
            .collect();
        arena.get_or_insert_with(object, || {
            Container::new(Arc::clone(meta), dependencies, self.process.container_env(meta))
        })
    }

    /// Recycles the function-scoped objects of `node`.
    fn end_function_scope(&self, node: &FlowNode) {
        let containers = node.objects.take_all();
        if containers.is_empty() {
            return;
        }
        let unhandled = recycle_scope(containers, Vec::new());
        if !unhandled.is_empty() {
            self.inner.lock().cleanups.extend(unhandled);
        }
    }

    pub(super) fn push(&self, step: Step) {
        self.inner.lock().stack.push(step);
    }

    fn discard(&self, step: Step) {
        if let Step::Run(node) = step {
            self.end_function_scope(&node);
        }
    }

    /// Drops every pending step without running callbacks.
    pub(super) fn discard_all(&self) {
        loop {
            let step = self.inner.lock().stack.pop();
            match step {
                Some(step) => self.discard(step),
                None => return,
            }
        }
    }

    /// Drops steps down to (not including) `branch`'s completion marker.
    pub(super) fn unwind_to(&self, branch: &Arc<Branch>) {
        loop {
            let step = {
                let mut inner = self.inner.lock();
                match inner.stack.last() {
                    None => return,
                    Some(Step::Complete(b)) if Arc::ptr_eq(b, branch) => return,
                    Some(_) => inner.stack.pop(),
                }
            };
            if let Some(step) = step {
                self.discard(step);
            }
        }
    }

    /// Drops steps down to and including `branch`'s completion marker.
    pub(super) fn unwind_through(&self, branch: &Arc<Branch>) {
        self.unwind_to(branch);
        let mut inner = self.inner.lock();
        if matches!(inner.stack.last(), Some(Step::Complete(b)) if Arc::ptr_eq(b, branch)) {
            inner.stack.pop();
        }
    }

    fn complete(self: &Arc<Self>) {
        let cleanups = {
            let mut inner = self.inner.lock();
            if inner.status == Status::Complete {
                return;
            }
            inner.status = Status::Complete;
            std::mem::take(&mut inner.cleanups)
        };
        let unhandled = recycle_scope(self.objects.take_all(), cleanups);
        self.publish(Event::new(EventKind::ThreadCompleted));
        self.process.thread_completed(unhandled);
    }
}
