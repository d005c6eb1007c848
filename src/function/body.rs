//! # Function bodies.
//!
//! [`ManagedFunction`] is the synchronous body the kernel executes on a team
//! worker. [`FunctionFn`] adapts a closure.

use super::FunctionContext;

/// # Synchronous function body.
///
/// Returning `Err` escalates the error from this function. Returning an
/// [`Escalation`](crate::Escalation) wrapped in `anyhow::Error` rethrows it
/// unchanged.
pub trait ManagedFunction: Send + Sync + 'static {
    /// Runs the body once for one invocation.
    fn execute(&self, ctx: &mut FunctionContext<'_>) -> anyhow::Result<()>;
}

/// Closure-backed [`ManagedFunction`].
pub struct FunctionFn<F>(F);

impl<F> FunctionFn<F>
where
    F: Fn(&mut FunctionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ManagedFunction for FunctionFn<F>
where
    F: Fn(&mut FunctionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn execute(&self, ctx: &mut FunctionContext<'_>) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}
