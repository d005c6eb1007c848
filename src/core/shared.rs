//! Resolved kernel wiring shared by processes, threads and invokers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use super::tracker::ProcessTracker;
use super::{ProcessId, ThreadId};
use crate::config::KernelConfig;
use crate::events::{Bus, Event};
use crate::function::{EscalationHandler, EscalationMatcher, ManagedFunction};
use crate::object::{Monitor, ObjectMeta};
use crate::team::Team;

pub(crate) struct TeamEntry {
    pub name: Arc<str>,
    pub team: Arc<dyn Team>,
}

/// Handler declaration resolved to a function id.
pub(crate) struct HandlerBinding {
    pub matcher: EscalationMatcher,
    pub function: usize,
}

/// First binding accepting `escalation`.
pub(crate) fn find_binding(bindings: &[HandlerBinding], escalation: &crate::Escalation) -> Option<usize> {
    bindings
        .iter()
        .find(|b| b.matcher.matches(escalation))
        .map(|b| b.function)
}

/// Function declaration after name resolution.
pub(crate) struct FunctionMeta {
    pub name: Arc<str>,
    pub team: usize,
    pub body: Arc<dyn ManagedFunction>,
    pub objects: Vec<usize>,
    pub object_names: Vec<Arc<str>>,
    pub next: Option<usize>,
    pub flows: Vec<usize>,
    pub handlers: Vec<HandlerBinding>,
}

pub(crate) struct Shared {
    pub cfg: KernelConfig,
    pub bus: Bus,
    pub teams: Vec<TeamEntry>,
    pub functions: Vec<Arc<FunctionMeta>>,
    pub function_index: HashMap<String, usize>,
    pub objects: Vec<Arc<ObjectMeta>>,
    pub object_index: HashMap<String, usize>,
    pub thread_handlers: Vec<HandlerBinding>,
    pub process_handler: Option<EscalationHandler>,
    pub monitor: Arc<Monitor>,
    pub tracker: ProcessTracker,
    /// Cancelled once the kernel stops accepting invocations.
    pub closed: CancellationToken,
    next_process: AtomicU64,
    next_thread: AtomicU64,
    stopped: AtomicBool,
}

impl Shared {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: KernelConfig,
        bus: Bus,
        teams: Vec<TeamEntry>,
        functions: Vec<Arc<FunctionMeta>>,
        function_index: HashMap<String, usize>,
        objects: Vec<Arc<ObjectMeta>>,
        object_index: HashMap<String, usize>,
        thread_handlers: Vec<HandlerBinding>,
        process_handler: Option<EscalationHandler>,
    ) -> Self {
        Self {
            cfg,
            bus,
            teams,
            functions,
            function_index,
            objects,
            object_index,
            thread_handlers,
            process_handler,
            monitor: Arc::new(Monitor::new()),
            tracker: ProcessTracker::new(),
            closed: CancellationToken::new(),
            next_process: AtomicU64::new(1),
            next_thread: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn next_process_id(&self) -> ProcessId {
        ProcessId::new(self.next_process.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_thread_id(&self) -> ThreadId {
        ThreadId::new(self.next_thread.fetch_add(1, Ordering::Relaxed))
    }

    pub fn publish(&self, event: Event) {
        self.bus.publish(event);
    }

    /// Stops sources, teams and the monitor. Runs once.
    pub fn stop_components(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();
        for object in &self.objects {
            object.source.stop();
        }
        for entry in &self.teams {
            entry.team.stop();
        }
        self.monitor.stop();
    }
}
