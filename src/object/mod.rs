//! # Managed objects: lazily sourced, scoped, recycled.
//!
//! A Managed Object is described once by an [`ObjectSpec`] and instantiated
//! lazily, per scope, inside a container that walks this state machine:
//!
//! ```text
//!              source() ok                 loaded()
//! UNSOURCED ──► SOURCING ──────────────► LOADED ◄──────────┐
//!                  │  └─ Pending ─► OPERATION_PENDING ─────┘
//!                  │                      │   ▲ start_operation()
//!                  │ error                │ failed() / timeout
//!                  ▼                      ▼
//!               FAILED ◄──────────────────┘
//!
//! any state ──recycle()──► RECYCLING ──► RECYCLED   (once, at scope end)
//! ```
//!
//! ## Scopes
//! [`Scope::Function`] objects live for one function invocation,
//! [`Scope::Thread`] for one thread state, [`Scope::Process`] for the whole
//! process. A dependency must be of the same or a wider scope.
//!
//! ## Recycling
//! At scope end all containers are recycled, dependents before their
//! dependencies, except that an object interested in another object's type
//! (see [`ObjectSpec::cleanup_interest`]) is recycled after every object of
//! that type and receives their [`CleanupEscalation`]s.

mod arena;
mod container;
mod monitor;
mod recycle;
mod source;
mod spec;

pub(crate) use arena::ObjectArena;
pub(crate) use container::{Container, ContainerEnv, Readiness};
pub(crate) use monitor::Monitor;
pub(crate) use recycle::recycle_scope;
pub use recycle::CleanupEscalation;
pub use source::{
    AsyncContext, ManagedObjectSource, RecycleContext, SourceContext, SourceFn, Sourced,
    StartContext,
};
pub(crate) use spec::ObjectMeta;
pub use spec::{ObjectSpec, Scope};

use std::any::Any;
use std::sync::Arc;

/// Shared handle to a sourced object instance.
pub type ObjectRef = Arc<dyn Any + Send + Sync>;
