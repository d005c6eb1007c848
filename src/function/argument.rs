use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque value passed to a function invocation.
///
/// Cheap to clone. Handler functions receive the [`Escalation`](crate::Escalation)
/// they handle as their argument.
///
/// ```rust
/// use flowvisor::Argument;
///
/// let arg = Argument::new(10u32);
/// assert_eq!(arg.get::<u32>(), Some(&10));
/// assert_eq!(arg.get::<i64>(), None);
/// assert!(Argument::none().is_none());
/// ```
#[derive(Clone, Default)]
pub struct Argument(Option<Arc<dyn Any + Send + Sync>>);

impl Argument {
    /// Wraps a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Wraps an already shared value.
    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(Some(value))
    }

    /// The empty argument.
    pub fn none() -> Self {
        Self(None)
    }

    /// True when no value was supplied.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrows the value as `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }

    /// The shared value.
    pub fn as_arc(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.0.as_ref()
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Argument(..)"),
            None => f.write_str("Argument(None)"),
        }
    }
}
