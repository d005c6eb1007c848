//! # Object sources: how instances come to exist and go away.
//!
//! A [`ManagedObjectSource`] is started once with the kernel, asked to
//! [`source`](ManagedObjectSource::source) an instance whenever a scope needs
//! one, and asked to [`recycle`](ManagedObjectSource::recycle) each instance
//! when its scope ends.
//!
//! Sourcing may complete later: return [`Sourced::Pending`] and keep the
//! [`AsyncContext`] from the [`SourceContext`]. The functions waiting on the
//! object are parked until [`AsyncContext::loaded`] or
//! [`AsyncContext::failed`] is called, or until the object's timeout expires.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use super::container::Container;
use super::{CleanupEscalation, ObjectRef};
use crate::core::FlowInvoker;

/// Outcome of [`ManagedObjectSource::source`].
pub enum Sourced {
    /// The instance is available now.
    Ready(ObjectRef),
    /// The instance will be supplied through the [`AsyncContext`].
    Pending,
}

impl Sourced {
    /// Wraps a value as [`Sourced::Ready`].
    pub fn ready<T: Any + Send + Sync>(value: T) -> Self {
        Sourced::Ready(Arc::new(value))
    }
}

impl fmt::Debug for Sourced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sourced::Ready(_) => f.write_str("Ready(..)"),
            Sourced::Pending => f.write_str("Pending"),
        }
    }
}

/// # Supplier of object instances.
///
/// Implementations are shared across all scopes and threads.
pub trait ManagedObjectSource: Send + Sync + 'static {
    /// Called once at kernel construction.
    ///
    /// Sources that trigger processes keep the [`FlowInvoker`] from `ctx`.
    fn start(&self, _ctx: &StartContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Supplies an instance for a new scope.
    fn source(&self, ctx: &SourceContext) -> anyhow::Result<Sourced>;

    /// Releases an instance at scope end.
    ///
    /// An error becomes a [`CleanupEscalation`] offered to interested objects.
    fn recycle(&self, _ctx: &RecycleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once at kernel shutdown.
    fn stop(&self) {}
}

/// Passed to [`ManagedObjectSource::start`].
pub struct StartContext {
    object: Arc<str>,
    invoker: FlowInvoker,
}

impl StartContext {
    pub(crate) fn new(object: Arc<str>, invoker: FlowInvoker) -> Self {
        Self { object, invoker }
    }

    /// Name of the object being started.
    pub fn object_name(&self) -> &str {
        &self.object
    }

    /// Handle for invoking the object's declared flows as new processes.
    pub fn flow_invoker(&self) -> FlowInvoker {
        self.invoker.clone()
    }
}

/// Passed to [`ManagedObjectSource::source`].
pub struct SourceContext {
    object: Arc<str>,
    dependencies: Vec<ObjectRef>,
    async_context: AsyncContext,
}

impl SourceContext {
    pub(crate) fn new(object: Arc<str>, dependencies: Vec<ObjectRef>, async_context: AsyncContext) -> Self {
        Self {
            object,
            dependencies,
            async_context,
        }
    }

    /// Name of the object being sourced.
    pub fn object_name(&self) -> &str {
        &self.object
    }

    /// Dependency at `index` (declaration order), downcast to `T`.
    pub fn dependency<T: Any + Send + Sync>(&self, index: usize) -> Option<&T> {
        self.dependencies.get(index)?.downcast_ref::<T>()
    }

    /// Dependency at `index` without downcasting.
    pub fn dependency_ref(&self, index: usize) -> Option<&ObjectRef> {
        self.dependencies.get(index)
    }

    /// Completion handle for asynchronous sourcing and operations.
    pub fn async_context(&self) -> AsyncContext {
        self.async_context.clone()
    }
}

/// # Completion handle for asynchronous object work.
///
/// Cheap to clone and safe to move to other threads. Calls after the object's
/// scope has ended are ignored (a late instance is recycled on arrival).
#[derive(Clone)]
pub struct AsyncContext {
    container: Weak<Container>,
}

impl AsyncContext {
    pub(crate) fn new(container: Weak<Container>) -> Self {
        Self { container }
    }

    /// Supplies the instance of a source that returned [`Sourced::Pending`].
    pub fn loaded(&self, object: ObjectRef) {
        if let Some(c) = self.container.upgrade() {
            c.loaded(object);
        }
    }

    /// Fails sourcing or the current operation; dependent functions escalate.
    pub fn failed(&self, error: impl Into<anyhow::Error>) {
        if let Some(c) = self.container.upgrade() {
            c.failed(error.into());
        }
    }

    /// Moves a loaded object into OPERATION_PENDING.
    ///
    /// Functions binding the object park until the operation completes.
    /// Returns `false` when the object is not currently loaded.
    pub fn start_operation(&self) -> bool {
        self.container.upgrade().is_some_and(|c| c.start_operation())
    }

    /// Completes the operation started by [`AsyncContext::start_operation`].
    pub fn complete_operation(&self, result: anyhow::Result<()>) {
        if let Some(c) = self.container.upgrade() {
            c.complete_operation(result);
        }
    }
}

impl fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContext")
            .field("live", &(self.container.strong_count() > 0))
            .finish()
    }
}

/// Passed to [`ManagedObjectSource::recycle`].
pub struct RecycleContext<'a> {
    object: &'a str,
    instance: &'a ObjectRef,
    cleanups: &'a [CleanupEscalation],
}

impl<'a> RecycleContext<'a> {
    pub(crate) fn new(object: &'a str, instance: &'a ObjectRef, cleanups: &'a [CleanupEscalation]) -> Self {
        Self {
            object,
            instance,
            cleanups,
        }
    }

    /// Name of the object being recycled.
    pub fn object_name(&self) -> &str {
        self.object
    }

    /// The instance, downcast to `T`.
    pub fn instance<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.instance.downcast_ref::<T>()
    }

    /// The instance without downcasting.
    pub fn instance_ref(&self) -> &ObjectRef {
        self.instance
    }

    /// Recycle failures of objects whose type this object is interested in.
    ///
    /// Returning `Ok` from `recycle` marks all of them handled.
    pub fn cleanup_escalations(&self) -> &[CleanupEscalation] {
        self.cleanups
    }
}

type RecycleFn = dyn Fn(&RecycleContext<'_>) -> anyhow::Result<()> + Send + Sync;

/// # Closure-backed object source.
///
/// ```rust
/// use flowvisor::{SourceFn, Sourced};
///
/// let source = SourceFn::new(|_ctx| Ok(Sourced::ready(String::from("conn"))))
///     .with_recycle(|ctx| {
///         assert!(ctx.instance::<String>().is_some());
///         Ok(())
///     });
/// # let _ = source;
/// ```
pub struct SourceFn<F> {
    source: F,
    recycle: Option<Box<RecycleFn>>,
}

impl<F> SourceFn<F>
where
    F: Fn(&SourceContext) -> anyhow::Result<Sourced> + Send + Sync + 'static,
{
    /// Creates a source from a sourcing closure.
    pub fn new(source: F) -> Self {
        Self { source, recycle: None }
    }

    /// Adds a recycle closure.
    pub fn with_recycle<R>(mut self, recycle: R) -> Self
    where
        R: Fn(&RecycleContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.recycle = Some(Box::new(recycle));
        self
    }
}

impl<F> ManagedObjectSource for SourceFn<F>
where
    F: Fn(&SourceContext) -> anyhow::Result<Sourced> + Send + Sync + 'static,
{
    fn source(&self, ctx: &SourceContext) -> anyhow::Result<Sourced> {
        (self.source)(ctx)
    }

    fn recycle(&self, ctx: &RecycleContext<'_>) -> anyhow::Result<()> {
        match &self.recycle {
            Some(r) => r(ctx),
            None => Ok(()),
        }
    }
}
