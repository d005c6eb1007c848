//! # ProcessState: one logical invocation.
//!
//! A process owns its process-scoped objects and counts its live thread
//! states. When the last thread completes the process recycles its objects,
//! settles the outcome and notifies the completion callback and handles:
//!
//! ```text
//! outcome = first kernel-level failure
//!         | Cleanup(unhandled recycle failures)   when nothing else failed
//!         | Ok
//! ```
//!
//! A kernel-level failure abandons the process: parked threads are woken and
//! discard their remaining steps, so the process completes promptly and its
//! objects are still recycled.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::shared::Shared;
use super::thread::ThreadState;
use super::ProcessId;
use crate::error::{Escalation, panic_message};
use crate::events::{Event, EventKind};
use crate::function::EscalationHandler;
use crate::object::{CleanupEscalation, Container, ContainerEnv, ObjectArena, ObjectMeta, ObjectRef, recycle_scope};

/// Called once with the process failure (`None` on success).
pub type CompletionCallback = Box<dyn FnOnce(Option<Escalation>) + Send>;

pub(crate) type Outcome = Option<Result<(), Escalation>>;

struct Inner {
    active: usize,
    threads: Vec<Weak<ThreadState>>,
    failure: Option<Escalation>,
    cleanups: Vec<CleanupEscalation>,
    completed: bool,
}

pub(crate) struct ProcessState {
    pub id: ProcessId,
    pub shared: Arc<Shared>,
    pub objects: ObjectArena,
    entry: Arc<str>,
    handler: Option<EscalationHandler>,
    abandoned: AtomicBool,
    inner: Mutex<Inner>,
    callback: Mutex<Option<CompletionCallback>>,
    outcome: watch::Sender<Outcome>,
}

impl ProcessState {
    pub fn new(
        shared: Arc<Shared>,
        entry: Arc<str>,
        handler: Option<EscalationHandler>,
        callback: Option<CompletionCallback>,
    ) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            id: shared.next_process_id(),
            objects: ObjectArena::new(shared.objects.len()),
            shared,
            entry,
            handler,
            abandoned: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                active: 0,
                threads: Vec::new(),
                failure: None,
                cleanups: Vec::new(),
                completed: false,
            }),
            callback: Mutex::new(callback),
            outcome,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Outcome> {
        self.outcome.subscribe()
    }

    /// Invocation handler, else the kernel-wide process handler.
    pub fn handler(&self) -> Option<&EscalationHandler> {
        self.handler.as_ref().or(self.shared.process_handler.as_ref())
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    pub fn container_env(&self, meta: &ObjectMeta) -> ContainerEnv {
        self.env_with_timeout(meta.timeout.or(self.shared.cfg.default_async_timeout()))
    }

    fn env_with_timeout(&self, timeout: Option<Duration>) -> ContainerEnv {
        ContainerEnv {
            process: self.id,
            timeout,
            bus: self.shared.bus.clone(),
            monitor: Arc::clone(&self.shared.monitor),
        }
    }

    /// Installs an externally supplied instance as the process object.
    ///
    /// `timeout` overrides the object's timeout for operations on it.
    pub fn install_trigger(&self, object: usize, instance: ObjectRef, timeout: Option<Duration>) {
        let meta = Arc::clone(&self.shared.objects[object]);
        let timeout = timeout
            .or(meta.timeout)
            .or(self.shared.cfg.default_async_timeout());
        let env = self.env_with_timeout(timeout);
        self.objects
            .get_or_insert_with(object, || Container::preloaded(meta, instance, env));
    }

    pub fn register_thread(&self, thread: &Arc<ThreadState>) {
        let mut inner = self.inner.lock();
        inner.active += 1;
        inner.threads.retain(|t| t.strong_count() > 0);
        inner.threads.push(Arc::downgrade(thread));
    }

    pub fn thread_completed(&self, unhandled: Vec<CleanupEscalation>) {
        let last = {
            let mut inner = self.inner.lock();
            inner.cleanups.extend(unhandled);
            inner.active = inner.active.saturating_sub(1);
            if inner.active == 0 && !inner.completed {
                inner.completed = true;
                true
            } else {
                false
            }
        };
        if last {
            self.complete();
        }
    }

    /// Records the kernel-level failure and abandons the process.
    ///
    /// Only the first failure is kept.
    pub fn fail(&self, escalation: Escalation) {
        let threads = {
            let mut inner = self.inner.lock();
            if inner.failure.is_none() {
                inner.failure = Some(escalation);
            }
            inner.threads.clone()
        };
        self.abandoned.store(true, Ordering::Release);
        for thread in threads.iter().filter_map(Weak::upgrade) {
            thread.resume();
        }
    }

    fn complete(&self) {
        let (failure, cleanups) = {
            let mut inner = self.inner.lock();
            (inner.failure.take(), std::mem::take(&mut inner.cleanups))
        };
        let unhandled = recycle_scope(self.objects.take_all(), cleanups);

        let outcome = match failure {
            Some(failure) => Err(failure),
            None if unhandled.is_empty() => Ok(()),
            None => Err(Escalation::Cleanup { escalations: unhandled }),
        };

        let event = match &outcome {
            Ok(()) => Event::new(EventKind::ProcessCompleted),
            Err(e) => Event::new(EventKind::ProcessFailed).with_reason(e.to_string()),
        };
        self.shared.publish(
            event
                .with_process(self.id.get())
                .with_function(Arc::clone(&self.entry)),
        );

        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            let failure = outcome.clone().err();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(move || callback(failure))) {
                tracing::warn!(
                    process = self.id.get(),
                    panic = %panic_message(&*panic),
                    "completion callback panicked"
                );
            }
        }

        self.outcome.send_replace(Some(outcome));
        self.shared.tracker.remove(self.id);
    }
}
