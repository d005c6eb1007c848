//! # Scope teardown: recycle order and cleanup escalations.
//!
//! When a scope ends its containers are recycled in an order derived from
//! two kinds of edges:
//!
//! ```text
//! dependency:  A depends on B            ─► A before B
//! interest:    P interested in type(C)   ─► C before P   (wins over a conflicting dependency edge)
//! ```
//!
//! Remaining ties (and anything left in a cycle of interests) fall back to
//! object declaration order. Each recycle failure becomes a
//! [`CleanupEscalation`]; it is offered to the interested objects recycled
//! after it and counts as handled once one of them recycles successfully.
//! Whatever is left unhandled is returned to the caller, which forwards it to
//! the next wider scope.

use std::fmt;
use std::sync::Arc;

use super::Container;

/// # Failure raised while recycling an object.
#[derive(Clone)]
pub struct CleanupEscalation {
    object: Arc<str>,
    object_type: Arc<str>,
    error: Arc<anyhow::Error>,
}

impl CleanupEscalation {
    pub(crate) fn new(object: Arc<str>, object_type: Arc<str>, error: anyhow::Error) -> Self {
        Self {
            object,
            object_type,
            error: Arc::new(error),
        }
    }

    /// Name of the object that failed to recycle.
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Type tag of the object that failed to recycle.
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// The recycle error.
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

impl fmt::Debug for CleanupEscalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupEscalation")
            .field("object", &self.object)
            .field("object_type", &self.object_type)
            .field("error", &format_args!("{:#}", self.error))
            .finish()
    }
}

impl fmt::Display for CleanupEscalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recycle of '{}' failed: {:#}", self.object, self.error)
    }
}

struct Tracked {
    escalation: CleanupEscalation,
    handled: bool,
}

/// Recycles every container of a scope; returns the unhandled escalations.
///
/// `inherited` are unhandled escalations forwarded from narrower scopes; they
/// are offered to this scope's interested objects like local ones.
pub(crate) fn recycle_scope(containers: Vec<Arc<Container>>, inherited: Vec<CleanupEscalation>) -> Vec<CleanupEscalation> {
    let mut tracked: Vec<Tracked> = inherited
        .into_iter()
        .map(|escalation| Tracked {
            escalation,
            handled: false,
        })
        .collect();

    for container in recycle_order(containers) {
        let meta = container.meta();
        let offered: Vec<usize> = tracked
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.handled && meta.is_interested_in(t.escalation.object_type()))
            .map(|(i, _)| i)
            .collect();
        let escalations: Vec<CleanupEscalation> = offered.iter().map(|&i| tracked[i].escalation.clone()).collect();

        match container.recycle(&escalations) {
            Some(Ok(())) => {
                for i in offered {
                    tracked[i].handled = true;
                }
            }
            Some(Err(escalation)) => tracked.push(Tracked {
                escalation,
                handled: false,
            }),
            None => {}
        }
    }

    tracked
        .into_iter()
        .filter(|t| !t.handled)
        .map(|t| t.escalation)
        .collect()
}

/// Orders containers for recycling (Kahn's algorithm, stable on input order).
pub(crate) fn recycle_order(containers: Vec<Arc<Container>>) -> Vec<Arc<Container>> {
    let n = containers.len();
    // before[a] lists the containers that must be recycled after `a`.
    let mut before: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    let mut add_edge = |from: usize, to: usize, before: &mut Vec<Vec<usize>>| {
        if from != to && !before[from].contains(&to) {
            before[from].push(to);
            indegree[to] += 1;
        }
    };

    for (a, container) in containers.iter().enumerate() {
        let meta = container.meta();
        for (b, other) in containers.iter().enumerate() {
            if a == b {
                continue;
            }
            if meta.is_interested_in(&other.meta().object_type) {
                add_edge(b, a, &mut before);
            }
        }
        for dep in container.dependencies() {
            let Some(b) = containers.iter().position(|c| Arc::ptr_eq(c, dep)) else {
                continue;
            };
            if meta.is_interested_in(&dep.meta().object_type) {
                continue;
            }
            add_edge(a, b, &mut before);
        }
    }

    let mut emitted = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = (0..n)
            .find(|&i| !emitted[i] && indegree[i] == 0)
            .or_else(|| (0..n).find(|&i| !emitted[i]));
        let Some(i) = next else { break };
        emitted[i] = true;
        order.push(i);
        for &j in &before[i] {
            indegree[j] = indegree[j].saturating_sub(1);
        }
    }

    let mut slots: Vec<Option<Arc<Container>>> = containers.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProcessId;
    use crate::events::Bus;
    use crate::object::{ContainerEnv, Monitor, ObjectMeta, Scope, SourceFn, Sourced};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn env() -> ContainerEnv {
        ContainerEnv {
            process: ProcessId::new(1),
            timeout: None,
            bus: Bus::new(16),
            monitor: Arc::new(Monitor::new()),
        }
    }

    fn container(
        id: usize,
        name: &str,
        object_type: &str,
        interest: &[&str],
        deps: Vec<Arc<Container>>,
        fail: bool,
        log: &Log,
    ) -> Arc<Container> {
        let log = Arc::clone(log);
        let source = SourceFn::new(|_| Ok(Sourced::Pending)).with_recycle(move |ctx| {
            let handled: Vec<&str> = ctx.cleanup_escalations().iter().map(|c| c.object()).collect();
            log.lock().push(format!("{}{:?}", ctx.object_name(), handled));
            if fail {
                anyhow::bail!("{} broke", ctx.object_name());
            }
            Ok(())
        });
        let meta = Arc::new(ObjectMeta {
            id,
            name: name.into(),
            object_type: object_type.into(),
            scope: Scope::Process,
            source: Arc::new(source),
            dependencies: Vec::new(),
            timeout: None,
            interest: interest.iter().map(|t| Arc::<str>::from(*t)).collect(),
            flows: Vec::new(),
        });
        Container::preloaded_with(meta, deps, Arc::new(()), env())
    }

    #[test]
    fn test_dependents_recycled_first() {
        let log = Log::default();
        let pool = container(0, "pool", "pool", &[], vec![], false, &log);
        let conn = container(1, "conn", "conn", &[], vec![Arc::clone(&pool)], false, &log);

        let unhandled = recycle_scope(vec![pool, conn], Vec::new());
        assert!(unhandled.is_empty());
        assert_eq!(*log.lock(), vec!["conn[]", "pool[]"]);
    }

    #[test]
    fn test_interest_overrides_dependency_order() {
        let log = Log::default();
        let c = container(0, "c", "C", &[], vec![], true, &log);
        let p = container(1, "p", "P", &["C"], vec![Arc::clone(&c)], false, &log);

        let unhandled = recycle_scope(vec![c, p], Vec::new());
        assert!(unhandled.is_empty(), "p handled c's failure");
        assert_eq!(*log.lock(), vec!["c[]", "p[\"c\"]"]);
    }

    #[test]
    fn test_unhandled_failures_are_returned() {
        let log = Log::default();
        let a = container(0, "a", "A", &[], vec![], true, &log);
        let b = container(1, "b", "B", &["Z"], vec![], false, &log);

        let unhandled = recycle_scope(vec![a, b], Vec::new());
        assert_eq!(unhandled.len(), 1);
        assert_eq!(unhandled[0].object(), "a");
    }

    #[test]
    fn test_inherited_failures_offered_to_interested() {
        let log = Log::default();
        let inherited = CleanupEscalation::new("tmp".into(), "File".into(), anyhow::anyhow!("disk"));
        let janitor = container(0, "janitor", "J", &["File"], vec![], false, &log);

        let unhandled = recycle_scope(vec![janitor], vec![inherited]);
        assert!(unhandled.is_empty());
        assert_eq!(*log.lock(), vec!["janitor[\"tmp\"]"]);
    }

    #[test]
    fn test_failing_handler_keeps_offered_unhandled() {
        let log = Log::default();
        let c = container(0, "c", "C", &[], vec![], true, &log);
        let p = container(1, "p", "P", &["C"], vec![], true, &log);

        let unhandled = recycle_scope(vec![p, c], Vec::new());
        let names: Vec<&str> = unhandled.iter().map(|c| c.object()).collect();
        assert_eq!(names, vec!["c", "p"]);
    }
}
