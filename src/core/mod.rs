//! Runtime core: processes, threads, flows and escalation routing.
//!
//! The public surface is [`Kernel`] (built by [`KernelBuilder`]) together with
//! the handles it returns. Everything else is internal:
//! - [`builder`]: validates declarations and starts components;
//! - [`kernel`]: invocation entry points, flow invokers and shutdown;
//! - [`process`]: one invocation, its process-scoped objects and outcome;
//! - [`thread`]: resumable step stack of one flow of control;
//! - [`flow`]: flow nodes and branches (sub-flows, spawned flows, handlers);
//! - [`escalation`]: routes failures from function level up to the kernel;
//! - [`tracker`]: in-flight processes for shutdown;
//! - [`shutdown`]: cross-platform shutdown signal handling.

mod builder;
mod escalation;
mod flow;
mod ids;
mod kernel;
mod process;
mod shared;
mod shutdown;
mod thread;
mod tracker;

pub use builder::KernelBuilder;
pub use escalation::EscalationLevel;
pub use ids::{ProcessId, ThreadId};
pub use kernel::{FlowInvoker, Invocation, Kernel, ProcessHandle};
pub use process::CompletionCallback;

pub(crate) use flow::FlowNode;
pub(crate) use thread::ThreadState;
