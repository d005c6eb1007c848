use std::fmt;
use std::sync::Arc;

use super::{EscalationMatcher, FunctionContext, FunctionFn, ManagedFunction};

/// # Declaration of a managed function.
///
/// Names are resolved when the kernel is built; an unknown team, object or
/// target function is reported as a [`KernelError`](crate::KernelError).
///
/// ```rust
/// use flowvisor::{EscalationMatcher, FunctionSpec};
///
/// let spec = FunctionSpec::new("parse", "cpu", |ctx| {
///     let raw = ctx.object::<String>(0)?;
///     ctx.next(flowvisor::Argument::new(raw.len()))?;
///     Ok(())
/// })
/// .object("request")
/// .next("store")
/// .handle(EscalationMatcher::Timeout, "on_timeout");
///
/// assert_eq!(spec.name(), "parse");
/// assert_eq!(spec.team(), "cpu");
/// ```
#[derive(Clone)]
pub struct FunctionSpec {
    pub(crate) name: String,
    pub(crate) team: String,
    pub(crate) body: Arc<dyn ManagedFunction>,
    pub(crate) objects: Vec<String>,
    pub(crate) next: Option<String>,
    pub(crate) flows: Vec<String>,
    pub(crate) handlers: Vec<(EscalationMatcher, String)>,
}

impl FunctionSpec {
    /// Declares a function executed by `team` with a closure body.
    pub fn new<F>(name: impl Into<String>, team: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut FunctionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::from_function(name, team, Arc::new(FunctionFn::new(body)))
    }

    /// Declares a function with a shared [`ManagedFunction`] body.
    pub fn from_function(
        name: impl Into<String>,
        team: impl Into<String>,
        body: Arc<dyn ManagedFunction>,
    ) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            body,
            objects: Vec::new(),
            next: None,
            flows: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Binds an object at the next index.
    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.objects.push(object.into());
        self
    }

    /// Sets the function that follows on the same thread.
    pub fn next(mut self, function: impl Into<String>) -> Self {
        self.next = Some(function.into());
        self
    }

    /// Declares a flow at the next index.
    pub fn flow(mut self, function: impl Into<String>) -> Self {
        self.flows.push(function.into());
        self
    }

    /// Routes escalations accepted by `matcher` to the handler function.
    ///
    /// The handler receives the escalation as its argument and replaces the
    /// rest of the failed function's flow.
    pub fn handle(mut self, matcher: EscalationMatcher, handler: impl Into<String>) -> Self {
        self.handlers.push((matcher, handler.into()));
        self
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Team name.
    pub fn team(&self) -> &str {
        &self.team
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("objects", &self.objects)
            .field("next", &self.next)
            .field("flows", &self.flows)
            .field("handlers", &self.handlers)
            .finish()
    }
}
