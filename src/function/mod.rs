//! # Managed functions and the flow graph.
//!
//! A function is a synchronous body plus a static declaration
//! ([`FunctionSpec`]): the team that executes it, the objects it binds (by
//! index), an optional next function, indexed flows and escalation handlers.
//!
//! At run time the body sees a [`FunctionContext`]. From it the function can
//! read its argument and bound objects and request continuations:
//!
//! ```text
//!   next(arg)              same thread, after this function (and its sub-flows)
//!   sub_flow(i, arg, cb)   same thread, before `next`; `cb` sees the outcome
//!   spawn_flow(i, arg, cb) new thread state in the same process
//! ```
//!
//! Requests take effect only when the body returns `Ok`; a failing body
//! discards them and escalates instead.

mod argument;
mod body;
mod callback;
mod context;
mod matcher;
mod spec;

pub use argument::Argument;
pub use body::{FunctionFn, ManagedFunction};
pub use callback::FlowCallback;
pub(crate) use context::FlowRequests;
pub use context::FunctionContext;
pub use matcher::{EscalationHandler, EscalationMatcher};
pub use spec::FunctionSpec;
