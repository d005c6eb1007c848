//! Error types used by the flowvisor kernel, its functions and its wiring.
//!
//! - [`Escalation`]: a failure routed up the function/flow/process hierarchy.
//! - [`KernelError`]: configuration/wiring errors and rejected invocations.
//! - [`RuntimeError`]: errors raised by the kernel itself during shutdown.
//! - [`FlowError`] / [`ObjectError`]: misuse of the function-local API.
//!
//! All types provide `as_label` for logs/metrics.

use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::ProcessId;
use crate::object::CleanupEscalation;

/// # Failure routed through the escalation chain.
///
/// Cheap to clone: the wrapped error is shared. A function returning an
/// `anyhow::Error` that wraps an `Escalation` rethrows the original value
/// (see the `From<anyhow::Error>` impl).
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum Escalation {
    /// A function body, callback or asynchronous operation failed.
    #[error("{error}")]
    Failure {
        /// The underlying error.
        error: Arc<anyhow::Error>,
    },

    /// A Managed Object could not be sourced.
    #[error("sourcing of object '{object}' failed: {error}")]
    Sourcing {
        /// Name of the object.
        object: Arc<str>,
        /// The underlying error.
        error: Arc<anyhow::Error>,
    },

    /// The function's team declined the job.
    #[error("team '{team}' declined function '{function}': {reason}")]
    BackPressure {
        /// Team that reported back-pressure.
        team: Arc<str>,
        /// Function whose job was declined.
        function: Arc<str>,
        /// Team supplied reason.
        reason: Arc<str>,
    },

    /// An asynchronous object operation did not complete in time.
    #[error("object '{object}' timed out after {timeout:?}")]
    Timeout {
        /// Name of the object.
        object: Arc<str>,
        /// The configured timeout.
        timeout: Duration,
    },

    /// A function body panicked.
    #[error("function '{function}' panicked: {message}")]
    Panicked {
        /// Name of the function.
        function: Arc<str>,
        /// Panic payload rendered as text.
        message: Arc<str>,
    },

    /// Recycle failures nobody handled, reported once at teardown.
    #[error("{} object(s) failed to recycle", .escalations.len())]
    Cleanup {
        /// The collected failures in recycle order.
        escalations: Vec<CleanupEscalation>,
    },

    /// The kernel was closed while the process was still pending.
    #[error("kernel shut down before the process completed")]
    Shutdown,
}

impl Escalation {
    /// Wraps a plain message as a [`Escalation::Failure`].
    pub fn msg<M>(message: M) -> Self
    where
        M: Display + Debug + Send + Sync + 'static,
    {
        Escalation::Failure {
            error: Arc::new(anyhow::Error::msg(message)),
        }
    }

    /// Wraps an error as a [`Escalation::Failure`].
    pub fn failure(error: impl Into<anyhow::Error>) -> Self {
        Escalation::Failure {
            error: Arc::new(error.into()),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use flowvisor::Escalation;
    ///
    /// let err = Escalation::msg("boom");
    /// assert_eq!(err.as_label(), "escalation_failure");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            Escalation::Failure { .. } => "escalation_failure",
            Escalation::Sourcing { .. } => "escalation_sourcing",
            Escalation::BackPressure { .. } => "escalation_back_pressure",
            Escalation::Timeout { .. } => "escalation_timeout",
            Escalation::Panicked { .. } => "escalation_panicked",
            Escalation::Cleanup { .. } => "escalation_cleanup",
            Escalation::Shutdown => "escalation_shutdown",
        }
    }

    /// True for [`Escalation::BackPressure`].
    pub fn is_back_pressure(&self) -> bool {
        matches!(self, Escalation::BackPressure { .. })
    }

    /// True for [`Escalation::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Escalation::Timeout { .. })
    }

    /// Downcasts the wrapped error of `Failure`/`Sourcing` escalations.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        match self {
            Escalation::Failure { error } | Escalation::Sourcing { error, .. } => {
                error.downcast_ref::<E>()
            }
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Escalation {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<Escalation>() {
            Ok(escalation) => escalation,
            Err(error) => Escalation::Failure {
                error: Arc::new(error),
            },
        }
    }
}

/// # Wiring and invocation errors.
///
/// Detected at construction time by `KernelBuilder::build`, or when an
/// invocation names something the kernel does not know. No process is
/// started when one of these is returned.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Two teams, objects or functions share a name.
    #[error("duplicate {kind} '{name}'")]
    DuplicateName {
        /// What was registered twice ("team", "object", "function").
        kind: &'static str,
        /// The clashing name.
        name: String,
    },

    /// A function requires a team that was never registered.
    #[error("function '{function}' requires unknown team '{team}'")]
    UnknownTeam {
        /// The function.
        function: String,
        /// The missing team.
        team: String,
    },

    /// A function, handler or flow names an unregistered function.
    #[error("unknown function '{name}'")]
    UnknownFunction {
        /// The missing function.
        name: String,
    },

    /// A function or object binds an unregistered object.
    #[error("'{referrer}' binds unknown object '{object}'")]
    UnknownObject {
        /// Who referenced the object.
        referrer: String,
        /// The missing object.
        object: String,
    },

    /// A flow target does not resolve to a function.
    #[error("'{owner}' declares flow to unknown function '{target}'")]
    UnknownFlowTarget {
        /// Function or object declaring the flow.
        owner: String,
        /// The unresolved target.
        target: String,
    },

    /// Object dependencies form a cycle.
    #[error("cyclic object dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Object names along the cycle (first repeated at the end).
        cycle: Vec<String>,
    },

    /// An object depends on an object of narrower scope.
    #[error("object '{object}' ({scope}) cannot depend on '{dependency}' ({dependency_scope})")]
    ScopeViolation {
        /// The dependent object.
        object: String,
        /// Its scope.
        scope: &'static str,
        /// The dependency.
        dependency: String,
        /// The dependency scope.
        dependency_scope: &'static str,
    },

    /// Objects that trigger flows (or are supplied by an invocation) must be process scoped.
    #[error("object '{object}' triggers processes and must be process scoped")]
    TriggerNotProcessScoped {
        /// The object.
        object: String,
    },

    /// A flow index outside the declared flows.
    #[error("'{owner}' has no flow with index {index}")]
    UnknownFlow {
        /// Function or object.
        owner: String,
        /// Requested index.
        index: usize,
    },

    /// A source failed to start.
    #[error("object source '{object}' failed to start: {error}")]
    SourceStart {
        /// The object.
        object: String,
        /// Error message.
        error: String,
    },

    /// A team or the timeout monitor failed to start.
    #[error("{component} failed to start: {error}")]
    StartFailed {
        /// What failed ("team 'io'", "monitor").
        component: String,
        /// Error message.
        error: String,
    },

    /// The kernel no longer accepts invocations.
    #[error("kernel is closed")]
    Closed,
}

impl KernelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            KernelError::DuplicateName { .. } => "kernel_duplicate_name",
            KernelError::UnknownTeam { .. } => "kernel_unknown_team",
            KernelError::UnknownFunction { .. } => "kernel_unknown_function",
            KernelError::UnknownObject { .. } => "kernel_unknown_object",
            KernelError::UnknownFlowTarget { .. } => "kernel_unknown_flow_target",
            KernelError::CyclicDependency { .. } => "kernel_cyclic_dependency",
            KernelError::ScopeViolation { .. } => "kernel_scope_violation",
            KernelError::TriggerNotProcessScoped { .. } => "kernel_trigger_not_process_scoped",
            KernelError::UnknownFlow { .. } => "kernel_unknown_flow",
            KernelError::SourceStart { .. } => "kernel_source_start",
            KernelError::StartFailed { .. } => "kernel_start_failed",
            KernelError::Closed => "kernel_closed",
        }
    }
}

/// # Errors produced by the kernel runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some processes were still running.
    #[error("shutdown timeout {grace:?} exceeded; stuck processes: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Processes that did not complete in time.
        stuck: Vec<ProcessId>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}

/// # Misuse of the flow-requesting API inside a function.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// `next` was requested but the function declares no next function.
    #[error("function '{function}' declares no next function")]
    NoNext {
        /// The requesting function.
        function: String,
    },

    /// The flow index is outside the function's declared flows.
    #[error("function '{function}' has no flow with index {index}")]
    UnknownFlow {
        /// The requesting function.
        function: String,
        /// Requested index.
        index: usize,
    },
}

/// # Misuse of bound-object access inside a function.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// The function binds fewer objects than the index.
    #[error("function '{function}' binds no object at index {index}")]
    IndexOutOfRange {
        /// The requesting function.
        function: String,
        /// Requested index.
        index: usize,
    },

    /// The bound object is not of the requested type.
    #[error("object '{object}' is not a {expected}")]
    TypeMismatch {
        /// The object.
        object: String,
        /// Requested type name.
        expected: &'static str,
    },
}

/// Renders a panic payload caught with `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn test_rethrow_preserves_variant() {
        let original = Escalation::Timeout {
            object: "conn".into(),
            timeout: Duration::from_millis(5),
        };
        let wrapped: anyhow::Error = original.into();
        let back = Escalation::from(wrapped);
        assert!(back.is_timeout());
    }

    #[test]
    fn test_foreign_error_becomes_failure() {
        let esc = Escalation::from(anyhow::Error::new(DiskFull));
        assert_eq!(esc.as_label(), "escalation_failure");
        assert!(esc.downcast_ref::<DiskFull>().is_some());
        assert_eq!(esc.to_string(), "disk full");
    }

    #[test]
    fn test_cyclic_dependency_message() {
        let err = KernelError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic object dependency: a -> b -> a");
    }
}
