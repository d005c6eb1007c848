//! # flowvisor
//!
//! **Flowvisor** is an in-process execution kernel for Rust.
//!
//! Applications declare *functions* (synchronous units of work bound to a
//! *team*), *managed objects* (resources sourced lazily per scope and recycled
//! in dependency order) and the *flows* that connect them. The kernel runs a
//! flow of control as a *thread state* that parks while an object is sourced
//! asynchronously and resumes on the owning team once it is ready. Failures
//! are routed outward through a fixed escalation chain until something handles
//! them.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ FunctionSpec │   │  ObjectSpec  │   │     Team     │   │  Subscribe   │
//!   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!          └──────────────────┴────────┬─────────┴──────────────────┘
//!                                      ▼
//!                          KernelBuilder::build()
//!                  (resolve names, reject cycles/scope errors)
//!                                      ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Kernel                                                               │
//! │  - teams (WorkerTeam / TokioTeam / PassiveTeam, bounded back-pressure)│
//! │  - Monitor (async operation timeouts)                                 │
//! │  - ProcessTracker (in-flight processes for shutdown)                  │
//! │  - Bus ──► subscriber listener ──► SubscriberSet                      │
//! └──────┬──────────────────────────────────────────────┬─────────────────┘
//!        ▼ invoke / FlowInvoker                         │
//!   ProcessState ──► ThreadState ──► Job ──► Team ──────┘ publishes events
//!        │               │
//!        │               ├─ Container (per scope) ─ check_ready ─► park / resume
//!        │               ├─ next / sub_flow / spawn_flow
//!        │               └─ escalate: Function ─► Flow ─► Thread ─► Process ─► Kernel
//!        ▼
//!   recycle objects (dependents first) ─► outcome ─► ProcessHandle / callback
//! ```
//!
//! ### Object lifecycle
//! ```text
//! Unsourced ─► Sourcing ─────────────────────────► Loaded ─► Recycling ─► Recycled
//!                 │                                 ▲  │
//!                 │ Sourced::Pending                │  │ AsyncContext::start_operation
//!                 ▼                                 │  │
//!          OperationPending ◄───────────────────────┼──┘
//!                 └── loaded / complete_operation(Ok)┘
//!
//! Sourcing, OperationPending ─► Failed (error, panic or timeout) ─► Recycling
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                 |
//! |-------------------|--------------------------------------------------------------|----------------------------------------------------|
//! | **Kernel**        | Build, invoke and shut down.                                 | [`Kernel`], [`KernelBuilder`], [`Invocation`]      |
//! | **Teams**         | Execute jobs with bounded queues or permits.                 | [`Team`], [`WorkerTeam`], [`TokioTeam`]            |
//! | **Functions**     | Units of work and their flows.                               | [`FunctionSpec`], [`FunctionContext`]              |
//! | **Objects**       | Scoped resources with async sourcing and ordered recycling.  | [`ObjectSpec`], [`ManagedObjectSource`]            |
//! | **Escalations**   | Typed failures and routing.                                  | [`Escalation`], [`EscalationMatcher`]              |
//! | **Subscriber API**| Hook into kernel events.                                     | [`Subscribe`], [`Event`]                           |
//! | **Configuration** | Centralize runtime settings.                                 | [`KernelConfig`]                                   |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use flowvisor::{
//!     Argument, FunctionSpec, Kernel, KernelConfig, ObjectSpec, Scope, SourceFn, Sourced, WorkerTeam,
//! };
//!
//! let kernel = Kernel::builder(KernelConfig::default())
//!     .team("io", WorkerTeam::new("io", 2, 64))
//!     .object(ObjectSpec::new("greeting", Scope::Process, SourceFn::new(|_| {
//!         Ok(Sourced::ready(String::from("hello")))
//!     })))
//!     .function(FunctionSpec::new("greet", "io", |ctx| {
//!         let greeting = ctx.object::<String>(0)?;
//!         let name = ctx.argument().get::<&str>().copied().unwrap_or("world");
//!         println!("{greeting}, {name}!");
//!         Ok(())
//!     }).object("greeting"))
//!     .build()?;
//!
//! let handle = kernel.invoke_process("greet", Argument::new("flowvisor"))?;
//! assert!(handle.wait().is_ok());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
mod config;
mod core;
mod error;
mod events;
mod function;
mod object;
mod subscribers;
mod team;

// ---- Public re-exports ----

pub use config::KernelConfig;
pub use core::{
    CompletionCallback, EscalationLevel, FlowInvoker, Invocation, Kernel, KernelBuilder, ProcessHandle, ProcessId,
    ThreadId,
};
pub use error::{Escalation, FlowError, KernelError, ObjectError, RuntimeError};
pub use events::{Event, EventKind};
pub use function::{
    Argument, EscalationHandler, EscalationMatcher, FlowCallback, FunctionContext, FunctionFn, FunctionSpec,
    ManagedFunction,
};
pub use object::{
    AsyncContext, CleanupEscalation, ManagedObjectSource, ObjectRef, ObjectSpec, RecycleContext, Scope, SourceContext,
    SourceFn, Sourced, StartContext,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use team::{BackPressure, Job, PassiveTeam, TokioTeam, Team, WorkerTeam};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
