use std::fmt;
use std::sync::Arc;

use crate::error::Escalation;

/// Closure handling an escalation in place.
///
/// `Ok` marks the escalation handled. `Err` rethrows (the same or a new
/// escalation), which restarts routing one level above the handler.
pub type EscalationHandler = Arc<dyn Fn(&Escalation) -> Result<(), Escalation> + Send + Sync>;

type Predicate = dyn Fn(&Escalation) -> bool + Send + Sync;

/// # Selects which escalations a handler accepts.
///
/// Handlers are tried in declaration order; the first whose matcher accepts
/// the escalation handles it.
#[derive(Clone)]
pub enum EscalationMatcher {
    /// Every escalation.
    Any,
    /// [`Escalation::BackPressure`].
    BackPressure,
    /// [`Escalation::Timeout`].
    Timeout,
    /// [`Escalation::Sourcing`].
    Sourcing,
    /// [`Escalation::Panicked`].
    Panicked,
    /// [`Escalation::Failure`].
    Failure,
    /// A custom predicate.
    Custom(Arc<Predicate>),
}

impl EscalationMatcher {
    /// Matches failures whose wrapped error downcasts to `E`.
    pub fn error<E>() -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::custom(|esc| esc.downcast_ref::<E>().is_some())
    }

    /// Matches escalations accepted by `predicate`.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Escalation) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// True when this matcher accepts `escalation`.
    pub fn matches(&self, escalation: &Escalation) -> bool {
        match self {
            EscalationMatcher::Any => true,
            EscalationMatcher::BackPressure => matches!(escalation, Escalation::BackPressure { .. }),
            EscalationMatcher::Timeout => matches!(escalation, Escalation::Timeout { .. }),
            EscalationMatcher::Sourcing => matches!(escalation, Escalation::Sourcing { .. }),
            EscalationMatcher::Panicked => matches!(escalation, Escalation::Panicked { .. }),
            EscalationMatcher::Failure => matches!(escalation, Escalation::Failure { .. }),
            EscalationMatcher::Custom(p) => p(escalation),
        }
    }
}

impl fmt::Debug for EscalationMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationMatcher::Any => f.write_str("Any"),
            EscalationMatcher::BackPressure => f.write_str("BackPressure"),
            EscalationMatcher::Timeout => f.write_str("Timeout"),
            EscalationMatcher::Sourcing => f.write_str("Sourcing"),
            EscalationMatcher::Panicked => f.write_str("Panicked"),
            EscalationMatcher::Failure => f.write_str("Failure"),
            EscalationMatcher::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("invalid input")]
    struct InvalidInput;

    #[test]
    fn test_variant_matchers() {
        let timeout = Escalation::Timeout {
            object: "db".into(),
            timeout: Duration::from_millis(1),
        };
        assert!(EscalationMatcher::Timeout.matches(&timeout));
        assert!(EscalationMatcher::Any.matches(&timeout));
        assert!(!EscalationMatcher::BackPressure.matches(&timeout));
        assert!(!EscalationMatcher::Failure.matches(&timeout));
    }

    #[test]
    fn test_error_type_matcher() {
        let matcher = EscalationMatcher::error::<InvalidInput>();
        assert!(matcher.matches(&Escalation::failure(InvalidInput)));
        assert!(!matcher.matches(&Escalation::msg("other")));
    }
}
