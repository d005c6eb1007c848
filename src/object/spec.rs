use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::ManagedObjectSource;

/// Lifetime of an object instance.
///
/// Ordered from narrowest to widest; an object may only depend on objects of
/// the same or a wider scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// One instance per function invocation.
    Function,
    /// One instance per thread state.
    Thread,
    /// One instance per process.
    Process,
}

impl Scope {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Function => "function",
            Scope::Thread => "thread",
            Scope::Process => "process",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Declaration of a Managed Object.
///
/// ```rust
/// use std::time::Duration;
/// use flowvisor::{ObjectSpec, Scope, SourceFn, Sourced};
///
/// let spec = ObjectSpec::new(
///     "connection",
///     Scope::Thread,
///     SourceFn::new(|_ctx| Ok(Sourced::ready(42u32))),
/// )
/// .depends_on("pool")
/// .with_type("db")
/// .with_timeout(Duration::from_secs(2));
///
/// assert_eq!(spec.name(), "connection");
/// assert_eq!(spec.object_type(), "db");
/// ```
#[derive(Clone)]
pub struct ObjectSpec {
    pub(crate) name: String,
    pub(crate) object_type: Option<String>,
    pub(crate) scope: Scope,
    pub(crate) source: Arc<dyn ManagedObjectSource>,
    pub(crate) dependencies: Vec<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) interest: Vec<String>,
    pub(crate) flows: Vec<String>,
}

impl ObjectSpec {
    /// Declares an object sourced by `source` within `scope`.
    pub fn new(name: impl Into<String>, scope: Scope, source: impl ManagedObjectSource) -> Self {
        Self::from_source(name, scope, Arc::new(source))
    }

    /// Same as [`ObjectSpec::new`] for an already shared source.
    pub fn from_source(
        name: impl Into<String>,
        scope: Scope,
        source: Arc<dyn ManagedObjectSource>,
    ) -> Self {
        Self {
            name: name.into(),
            object_type: None,
            scope,
            source,
            dependencies: Vec::new(),
            timeout: None,
            interest: Vec::new(),
            flows: Vec::new(),
        }
    }

    /// Adds a dependency; its instance is passed to the source at the next index.
    pub fn depends_on(mut self, object: impl Into<String>) -> Self {
        self.dependencies.push(object.into());
        self
    }

    /// Sets the type tag used for cleanup interest. Defaults to the name.
    pub fn with_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    /// Timeout for asynchronous operations (overrides the kernel default).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Registers interest in recycle failures of objects of `object_type`.
    ///
    /// This object is then recycled after all such objects in the same scope.
    pub fn cleanup_interest(mut self, object_type: impl Into<String>) -> Self {
        self.interest.push(object_type.into());
        self
    }

    /// Declares a flow the source can trigger; index = declaration order.
    ///
    /// Objects that trigger flows must be [`Scope::Process`].
    pub fn flow(mut self, function: impl Into<String>) -> Self {
        self.flows.push(function.into());
        self
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object type tag.
    pub fn object_type(&self) -> &str {
        self.object_type.as_deref().unwrap_or(&self.name)
    }

    /// Object scope.
    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl fmt::Debug for ObjectSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSpec")
            .field("name", &self.name)
            .field("type", &self.object_type())
            .field("scope", &self.scope)
            .field("dependencies", &self.dependencies)
            .field("timeout", &self.timeout)
            .field("interest", &self.interest)
            .field("flows", &self.flows)
            .finish()
    }
}

/// Object declaration after name resolution.
pub(crate) struct ObjectMeta {
    pub id: usize,
    pub name: Arc<str>,
    pub object_type: Arc<str>,
    pub scope: Scope,
    pub source: Arc<dyn ManagedObjectSource>,
    pub dependencies: Vec<usize>,
    pub timeout: Option<Duration>,
    pub interest: Vec<Arc<str>>,
    pub flows: Vec<usize>,
}

impl ObjectMeta {
    pub fn is_interested_in(&self, object_type: &str) -> bool {
        self.interest.iter().any(|t| &**t == object_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{SourceFn, Sourced};

    #[test]
    fn test_scope_order_narrow_to_wide() {
        assert!(Scope::Function < Scope::Thread);
        assert!(Scope::Thread < Scope::Process);
        assert_eq!(Scope::Process.to_string(), "process");
    }

    #[test]
    fn test_type_defaults_to_name() {
        let spec = ObjectSpec::new("cache", Scope::Process, SourceFn::new(|_| Ok(Sourced::Pending)));
        assert_eq!(spec.object_type(), "cache");
        let spec = spec.with_type("store").cleanup_interest("db");
        assert_eq!(spec.object_type(), "store");
        assert_eq!(spec.interest, vec!["db".to_string()]);
    }
}
