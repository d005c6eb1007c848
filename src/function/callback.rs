use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::{Escalation, panic_message};

type Callback = dyn FnOnce(Option<Escalation>) -> Result<(), Escalation> + Send;

/// # Completion callback of a sub-flow or spawned flow.
///
/// Invoked exactly once with `None` when the flow completes, or with the
/// escalation that reached the flow boundary unhandled. Returning `Err`
/// (for example rethrowing the received escalation) routes that error one
/// level above the flow's invoker.
///
/// ```rust
/// use flowvisor::FlowCallback;
///
/// let cb = FlowCallback::new(|outcome| match outcome {
///     None => Ok(()),
///     Some(escalation) => Err(escalation),
/// });
/// # let _ = cb;
/// ```
pub struct FlowCallback(Box<Callback>);

impl FlowCallback {
    /// Wraps a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Option<Escalation>) -> Result<(), Escalation> + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// A callback that swallows any escalation.
    pub fn ignore() -> Self {
        Self::new(|_| Ok(()))
    }

    /// Runs the callback; a panic is reported as an escalation.
    pub(crate) fn call(self, outcome: Option<Escalation>) -> Result<(), Escalation> {
        let f = self.0;
        catch_unwind(AssertUnwindSafe(move || f(outcome))).unwrap_or_else(|panic| {
            Err(Escalation::Panicked {
                function: "flow callback".into(),
                message: panic_message(&*panic).into(),
            })
        })
    }
}

impl fmt::Debug for FlowCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FlowCallback(..)")
    }
}
