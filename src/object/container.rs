//! # Container: one object instance and its state machine.
//!
//! Every transition happens under the container's mutex; waiter wake-ups,
//! source calls and event publishing happen after it is released. Threads that
//! find the object (or one of its dependencies) not ready register as waiters
//! and park; completion, failure or timeout resumes them all.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::recycle::CleanupEscalation;
use super::source::{AsyncContext, RecycleContext, SourceContext, Sourced};
use super::{Monitor, ObjectMeta, ObjectRef};
use crate::core::{ProcessId, ThreadState};
use crate::error::{Escalation, panic_message};
use crate::events::{Bus, Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectState {
    Unsourced,
    Sourcing,
    Loaded,
    OperationPending,
    Failed,
    Recycling,
    Recycled,
}

/// Result of [`Container::check_ready`].
pub(crate) enum Readiness {
    Ready(ObjectRef),
    /// The named object (this one or a dependency) is not ready yet; the
    /// caller has been registered as a waiter.
    Pending(Arc<str>),
    Failed(Escalation),
}

/// Per-process wiring shared by all containers of a process.
#[derive(Clone)]
pub(crate) struct ContainerEnv {
    pub process: ProcessId,
    pub timeout: Option<Duration>,
    pub bus: Bus,
    pub monitor: Arc<Monitor>,
}

struct Inner {
    state: ObjectState,
    instance: Option<ObjectRef>,
    failure: Option<Escalation>,
    waiters: Vec<Arc<ThreadState>>,
    deadline: Option<Instant>,
}

pub(crate) struct Container {
    meta: Arc<ObjectMeta>,
    dependencies: Vec<Arc<Container>>,
    env: ContainerEnv,
    me: Weak<Container>,
    inner: Mutex<Inner>,
}

impl Container {
    pub fn new(meta: Arc<ObjectMeta>, dependencies: Vec<Arc<Container>>, env: ContainerEnv) -> Arc<Self> {
        Self::with_state(meta, dependencies, env, ObjectState::Unsourced, None)
    }

    /// A container whose instance was supplied up front (external trigger).
    pub fn preloaded(meta: Arc<ObjectMeta>, instance: ObjectRef, env: ContainerEnv) -> Arc<Self> {
        Self::with_state(meta, Vec::new(), env, ObjectState::Loaded, Some(instance))
    }

    #[cfg(test)]
    pub fn preloaded_with(
        meta: Arc<ObjectMeta>,
        dependencies: Vec<Arc<Container>>,
        instance: ObjectRef,
        env: ContainerEnv,
    ) -> Arc<Self> {
        Self::with_state(meta, dependencies, env, ObjectState::Loaded, Some(instance))
    }

    fn with_state(
        meta: Arc<ObjectMeta>,
        dependencies: Vec<Arc<Container>>,
        env: ContainerEnv,
        state: ObjectState,
        instance: Option<ObjectRef>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Container {
            meta,
            dependencies,
            env,
            me: me.clone(),
            inner: Mutex::new(Inner {
                state,
                instance,
                failure: None,
                waiters: Vec::new(),
                deadline: None,
            }),
        })
    }

    pub fn meta(&self) -> &Arc<ObjectMeta> {
        &self.meta
    }

    pub fn dependencies(&self) -> &[Arc<Container>] {
        &self.dependencies
    }

    #[cfg(test)]
    pub fn state(&self) -> ObjectState {
        self.inner.lock().state
    }

    /// Readiness check for a function about to execute.
    ///
    /// Dependencies are made ready first (depth-first); an unsourced object is
    /// sourced on the calling thread. Returns `Pending` after registering
    /// `waiter` with whichever container is not ready.
    pub fn check_ready(&self, waiter: &Arc<ThreadState>) -> Readiness {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ObjectState::Loaded => {
                    return match &inner.instance {
                        Some(obj) => Readiness::Ready(Arc::clone(obj)),
                        None => Readiness::Failed(self.unavailable()),
                    };
                }
                ObjectState::Failed => {
                    return Readiness::Failed(inner.failure.clone().unwrap_or_else(|| self.unavailable()));
                }
                ObjectState::Sourcing | ObjectState::OperationPending => {
                    add_waiter(&mut inner.waiters, waiter);
                    return Readiness::Pending(Arc::clone(&self.meta.name));
                }
                ObjectState::Recycling | ObjectState::Recycled => {
                    return Readiness::Failed(self.unavailable());
                }
                ObjectState::Unsourced => {}
            }
        }

        let mut deps = Vec::with_capacity(self.dependencies.len());
        for dep in &self.dependencies {
            match dep.check_ready(waiter) {
                Readiness::Ready(obj) => deps.push(obj),
                other => return other,
            }
        }

        {
            let mut inner = self.inner.lock();
            if inner.state != ObjectState::Unsourced {
                drop(inner);
                return self.check_ready(waiter);
            }
            inner.state = ObjectState::Sourcing;
        }

        let ctx = SourceContext::new(
            Arc::clone(&self.meta.name),
            deps,
            AsyncContext::new(self.me.clone()),
        );
        let sourced = catch_unwind(AssertUnwindSafe(|| self.meta.source.source(&ctx)))
            .unwrap_or_else(|panic| Err(anyhow::anyhow!("source panicked: {}", panic_message(&*panic))));

        match sourced {
            Ok(Sourced::Ready(obj)) => {
                self.loaded(obj);
                self.check_ready(waiter)
            }
            Ok(Sourced::Pending) => {
                let mut inner = self.inner.lock();
                match inner.state {
                    ObjectState::Sourcing => {
                        inner.state = ObjectState::OperationPending;
                        let watch = self.arm_deadline(&mut inner);
                        add_waiter(&mut inner.waiters, waiter);
                        drop(inner);
                        if watch {
                            self.env.monitor.watch(self.me.clone());
                        }
                        Readiness::Pending(Arc::clone(&self.meta.name))
                    }
                    _ => {
                        drop(inner);
                        self.check_ready(waiter)
                    }
                }
            }
            Err(error) => {
                self.failed(error);
                self.check_ready(waiter)
            }
        }
    }

    /// Supplies the instance (synchronously or from an async completion).
    pub fn loaded(&self, obj: ObjectRef) {
        let (waiters, late) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ObjectState::Sourcing | ObjectState::OperationPending if inner.instance.is_none() => {
                    inner.state = ObjectState::Loaded;
                    inner.instance = Some(obj);
                    inner.deadline = None;
                    (std::mem::take(&mut inner.waiters), None)
                }
                ObjectState::Recycling | ObjectState::Recycled => (Vec::new(), Some(obj)),
                state => {
                    tracing::debug!(object = %self.meta.name, ?state, "ignoring late load");
                    return;
                }
            }
        };

        if let Some(late) = late {
            // Scope already ended; release the instance straight away.
            if let Err(failure) = self.run_recycle(&late, &[]) {
                tracing::warn!(object = %self.meta.name, error = %failure.error(), "late instance failed to recycle");
            }
            return;
        }
        self.publish(Event::new(EventKind::ObjectSourced));
        wake(waiters);
    }

    /// Fails sourcing or the in-flight operation.
    pub fn failed(&self, error: anyhow::Error) {
        let (waiters, escalation) = {
            let mut inner = self.inner.lock();
            match inner.state {
                ObjectState::Sourcing | ObjectState::OperationPending => {
                    let error = Arc::new(error);
                    let escalation = if inner.instance.is_none() {
                        Escalation::Sourcing {
                            object: Arc::clone(&self.meta.name),
                            error,
                        }
                    } else {
                        Escalation::Failure { error }
                    };
                    inner.state = ObjectState::Failed;
                    inner.failure = Some(escalation.clone());
                    inner.deadline = None;
                    (std::mem::take(&mut inner.waiters), escalation)
                }
                _ => return,
            }
        };
        self.publish(Event::new(EventKind::ObjectFailed).with_reason(escalation.to_string()));
        wake(waiters);
    }

    /// LOADED ─► OPERATION_PENDING.
    pub fn start_operation(&self) -> bool {
        let watch = {
            let mut inner = self.inner.lock();
            if inner.state != ObjectState::Loaded {
                return false;
            }
            inner.state = ObjectState::OperationPending;
            self.arm_deadline(&mut inner)
        };
        if watch {
            self.env.monitor.watch(self.me.clone());
        }
        true
    }

    /// OPERATION_PENDING ─► LOADED, or FAILED on error.
    pub fn complete_operation(&self, result: anyhow::Result<()>) {
        if let Err(error) = result {
            self.failed(error);
            return;
        }
        let waiters = {
            let mut inner = self.inner.lock();
            if inner.state != ObjectState::OperationPending || inner.instance.is_none() {
                return;
            }
            inner.state = ObjectState::Loaded;
            inner.deadline = None;
            std::mem::take(&mut inner.waiters)
        };
        wake(waiters);
    }

    /// Fails the object if its operation outlived the deadline.
    ///
    /// Returns `true` while the container still needs watching.
    pub fn check_timeout(&self, now: Instant) -> bool {
        let (waiters, timeout) = {
            let mut inner = self.inner.lock();
            if inner.state != ObjectState::OperationPending {
                return false;
            }
            match (inner.deadline, self.env.timeout) {
                (Some(deadline), Some(timeout)) if now >= deadline => {
                    let escalation = Escalation::Timeout {
                        object: Arc::clone(&self.meta.name),
                        timeout,
                    };
                    inner.state = ObjectState::Failed;
                    inner.failure = Some(escalation);
                    inner.deadline = None;
                    (std::mem::take(&mut inner.waiters), timeout)
                }
                (Some(_), _) => return true,
                _ => return false,
            }
        };
        self.publish(Event::new(EventKind::ObjectTimeout).with_timeout(timeout));
        wake(waiters);
        false
    }

    /// Recycles the container once.
    ///
    /// Returns `None` when nothing ran: already recycled or never sourced.
    /// `offered` are the cleanup escalations this object is interested in.
    /// Callers end a scope only after every function using it has returned.
    pub fn recycle(&self, offered: &[CleanupEscalation]) -> Option<Result<(), CleanupEscalation>> {
        let instance = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, ObjectState::Recycling | ObjectState::Recycled) {
                return None;
            }
            inner.waiters.clear();
            inner.deadline = None;
            let instance = inner.instance.take();
            inner.state = if instance.is_some() {
                ObjectState::Recycling
            } else {
                ObjectState::Recycled
            };
            instance
        }?;

        let result = self.run_recycle(&instance, offered);
        self.inner.lock().state = ObjectState::Recycled;
        Some(result)
    }

    fn run_recycle(&self, instance: &ObjectRef, offered: &[CleanupEscalation]) -> Result<(), CleanupEscalation> {
        let ctx = RecycleContext::new(&self.meta.name, instance, offered);
        let result = catch_unwind(AssertUnwindSafe(|| self.meta.source.recycle(&ctx)))
            .unwrap_or_else(|panic| Err(anyhow::anyhow!("recycle panicked: {}", panic_message(&*panic))));
        match result {
            Ok(()) => {
                self.publish(Event::new(EventKind::ObjectRecycled));
                Ok(())
            }
            Err(error) => {
                self.publish(Event::new(EventKind::RecycleFailed).with_reason(format!("{error:#}")));
                Err(CleanupEscalation::new(
                    Arc::clone(&self.meta.name),
                    Arc::clone(&self.meta.object_type),
                    error,
                ))
            }
        }
    }

    fn arm_deadline(&self, inner: &mut Inner) -> bool {
        match self.env.timeout {
            Some(timeout) => {
                inner.deadline = Some(Instant::now() + timeout);
                true
            }
            None => false,
        }
    }

    fn unavailable(&self) -> Escalation {
        Escalation::msg(format!("object '{}' is no longer available", self.meta.name))
    }

    fn publish(&self, event: Event) {
        self.env.bus.publish(
            event
                .with_process(self.env.process.get())
                .with_object(Arc::clone(&self.meta.name)),
        );
    }
}

fn add_waiter(waiters: &mut Vec<Arc<ThreadState>>, waiter: &Arc<ThreadState>) {
    if !waiters.iter().any(|w| Arc::ptr_eq(w, waiter)) {
        waiters.push(Arc::clone(waiter));
    }
}

fn wake(waiters: Vec<Arc<ThreadState>>) {
    for waiter in waiters {
        waiter.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Scope, SourceFn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn meta(name: &str, source: impl crate::ManagedObjectSource) -> Arc<ObjectMeta> {
        Arc::new(ObjectMeta {
            id: 0,
            name: name.into(),
            object_type: name.into(),
            scope: Scope::Process,
            source: Arc::new(source),
            dependencies: Vec::new(),
            timeout: None,
            interest: Vec::new(),
            flows: Vec::new(),
        })
    }

    fn env(timeout: Option<Duration>) -> ContainerEnv {
        ContainerEnv {
            process: ProcessId::new(1),
            timeout,
            bus: Bus::new(16),
            monitor: Arc::new(Monitor::new()),
        }
    }

    #[test]
    fn test_recycle_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let source = SourceFn::new(|_| Ok(Sourced::Pending)).with_recycle(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let c = Container::preloaded(meta("conn", source), Arc::new(1u8), env(None));

        assert!(matches!(c.recycle(&[]), Some(Ok(()))));
        assert!(c.recycle(&[]).is_none());
        assert_eq!(c.state(), ObjectState::Recycled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_operation_times_out() {
        let source = SourceFn::new(|_| Ok(Sourced::Pending));
        let c = Container::preloaded(meta("socket", source), Arc::new(()), env(Some(Duration::from_millis(5))));

        assert!(c.start_operation());
        assert_eq!(c.state(), ObjectState::OperationPending);
        assert!(c.check_timeout(Instant::now()));
        assert!(!c.check_timeout(Instant::now() + Duration::from_millis(10)));
        assert_eq!(c.state(), ObjectState::Failed);
    }

    #[test]
    fn test_operation_completes() {
        let source = SourceFn::new(|_| Ok(Sourced::Pending));
        let c = Container::preloaded(meta("socket", source), Arc::new(()), env(None));

        assert!(c.start_operation());
        assert!(!c.start_operation());
        c.complete_operation(Ok(()));
        assert_eq!(c.state(), ObjectState::Loaded);
    }

    #[test]
    fn test_late_instance_recycled_on_arrival() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let source = SourceFn::new(|_| Ok(Sourced::Pending)).with_recycle(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let c = Container::new(meta("late", source), Vec::new(), env(None));
        c.inner.lock().state = ObjectState::OperationPending;

        assert!(c.recycle(&[]).is_none());
        assert_eq!(c.state(), ObjectState::Recycled);
        c.loaded(Arc::new(5u32));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recycle_failure_becomes_cleanup_escalation() {
        let source = SourceFn::new(|_| Ok(Sourced::Pending)).with_recycle(|_| anyhow::bail!("flush failed"));
        let c = Container::preloaded(meta("file", source), Arc::new(()), env(None));

        let Some(Err(cleanup)) = c.recycle(&[]) else {
            panic!("expected a cleanup escalation");
        };
        assert_eq!(cleanup.object(), "file");
        assert_eq!(cleanup.object_type(), "file");
        assert_eq!(cleanup.error().to_string(), "flush failed");
    }
}
