//! # KernelBuilder: declarations in, validated kernel out.
//!
//! `build()` resolves every name and rejects broken wiring before anything
//! runs:
//!
//! - duplicate team, object or function names
//! - unknown teams, objects, next/flow targets and handler functions
//! - dependency cycles between objects
//! - dependencies on a narrower scope
//! - flow-triggering objects that are not process scoped
//!
//! It then starts teams, the timeout monitor and object sources (in that
//! order, rolling back on failure) and, when subscribers are configured,
//! spawns the listener that fans bus events out to them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::kernel::{FlowInvoker, Kernel};
use super::shared::{FunctionMeta, HandlerBinding, Shared, TeamEntry};
use crate::config::KernelConfig;
use crate::error::{Escalation, KernelError};
use crate::events::{Bus, Event, EventKind};
use crate::function::{EscalationHandler, EscalationMatcher, FunctionSpec};
use crate::object::{ObjectMeta, ObjectSpec, Scope, StartContext};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::team::Team;

/// Builder for a [`Kernel`].
///
/// ```rust
/// use flowvisor::{Argument, FunctionSpec, Kernel, KernelConfig, PassiveTeam};
///
/// let kernel = Kernel::builder(KernelConfig::default())
///     .team("main", PassiveTeam::new())
///     .function(FunctionSpec::new("hello", "main", |ctx| {
///         assert_eq!(ctx.argument().get::<&str>(), Some(&"world"));
///         Ok(())
///     }))
///     .build()
///     .expect("valid wiring");
///
/// let handle = kernel.invoke_process("hello", Argument::new("world")).unwrap();
/// assert!(handle.outcome().expect("passive team runs inline").is_ok());
/// ```
pub struct KernelBuilder {
    cfg: KernelConfig,
    teams: Vec<(String, Arc<dyn Team>)>,
    objects: Vec<ObjectSpec>,
    functions: Vec<FunctionSpec>,
    thread_handlers: Vec<(EscalationMatcher, String)>,
    process_handler: Option<EscalationHandler>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl KernelBuilder {
    /// Creates an empty builder.
    pub fn new(cfg: KernelConfig) -> Self {
        Self {
            cfg,
            teams: Vec::new(),
            objects: Vec::new(),
            functions: Vec::new(),
            thread_handlers: Vec::new(),
            process_handler: None,
            subscribers: Vec::new(),
        }
    }

    /// Registers a team under `name`.
    pub fn team(self, name: impl Into<String>, team: impl Team) -> Self {
        self.team_arc(name, Arc::new(team))
    }

    /// Registers an already shared team under `name`.
    pub fn team_arc(mut self, name: impl Into<String>, team: Arc<dyn Team>) -> Self {
        self.teams.push((name.into(), team));
        self
    }

    /// Declares a Managed Object.
    pub fn object(mut self, spec: ObjectSpec) -> Self {
        self.objects.push(spec);
        self
    }

    /// Declares a function.
    pub fn function(mut self, spec: FunctionSpec) -> Self {
        self.functions.push(spec);
        self
    }

    /// Thread-level handler function for escalations leaving a thread's flow.
    pub fn thread_escalation(mut self, matcher: EscalationMatcher, handler: impl Into<String>) -> Self {
        self.thread_handlers.push((matcher, handler.into()));
        self
    }

    /// Kernel-wide process handler, used when an invocation supplies none.
    pub fn process_escalation<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Escalation) -> Result<(), Escalation> + Send + Sync + 'static,
    {
        self.process_handler = Some(Arc::new(handler));
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive events through dedicated workers with bounded
    /// queues; `build` must then run inside a tokio runtime.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the wiring and starts the kernel.
    pub fn build(self) -> Result<Kernel, KernelError> {
        let KernelBuilder {
            cfg,
            teams,
            objects,
            functions,
            thread_handlers,
            process_handler,
            subscribers,
        } = self;

        let team_index = index_names("team", teams.iter().map(|(name, _)| name.as_str()))?;
        let object_index = index_names("object", objects.iter().map(|o| o.name.as_str()))?;
        let function_index = index_names("function", functions.iter().map(|f| f.name.as_str()))?;

        let resolve_target = |owner: &str, target: &str| {
            function_index
                .get(target)
                .copied()
                .ok_or_else(|| KernelError::UnknownFlowTarget {
                    owner: owner.to_string(),
                    target: target.to_string(),
                })
        };
        let resolve_handler = |name: &str| {
            function_index
                .get(name)
                .copied()
                .ok_or_else(|| KernelError::UnknownFunction { name: name.to_string() })
        };

        let mut object_metas = Vec::with_capacity(objects.len());
        for (id, spec) in objects.iter().enumerate() {
            let mut dependencies = Vec::with_capacity(spec.dependencies.len());
            for dep in &spec.dependencies {
                let dep_id = object_index
                    .get(dep)
                    .copied()
                    .ok_or_else(|| KernelError::UnknownObject {
                        referrer: spec.name.clone(),
                        object: dep.clone(),
                    })?;
                let dep_scope = objects[dep_id].scope;
                if dep_scope < spec.scope {
                    return Err(KernelError::ScopeViolation {
                        object: spec.name.clone(),
                        scope: spec.scope.as_str(),
                        dependency: dep.clone(),
                        dependency_scope: dep_scope.as_str(),
                    });
                }
                dependencies.push(dep_id);
            }
            let flows = spec
                .flows
                .iter()
                .map(|target| resolve_target(&spec.name, target))
                .collect::<Result<Vec<_>, _>>()?;
            if !flows.is_empty() && spec.scope != Scope::Process {
                return Err(KernelError::TriggerNotProcessScoped {
                    object: spec.name.clone(),
                });
            }
            object_metas.push(Arc::new(ObjectMeta {
                id,
                name: spec.name.as_str().into(),
                object_type: spec.object_type().into(),
                scope: spec.scope,
                source: Arc::clone(&spec.source),
                dependencies,
                timeout: spec.timeout,
                interest: spec.interest.iter().map(|t| t.as_str().into()).collect(),
                flows,
            }));
        }
        detect_cycle(&object_metas)?;

        let mut function_metas = Vec::with_capacity(functions.len());
        for spec in &functions {
            let team = team_index
                .get(&spec.team)
                .copied()
                .ok_or_else(|| KernelError::UnknownTeam {
                    function: spec.name.clone(),
                    team: spec.team.clone(),
                })?;
            let objects = spec
                .objects
                .iter()
                .map(|name| {
                    object_index
                        .get(name)
                        .copied()
                        .ok_or_else(|| KernelError::UnknownObject {
                            referrer: spec.name.clone(),
                            object: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let next = spec
                .next
                .as_deref()
                .map(|target| resolve_target(&spec.name, target))
                .transpose()?;
            let flows = spec
                .flows
                .iter()
                .map(|target| resolve_target(&spec.name, target))
                .collect::<Result<Vec<_>, _>>()?;
            let handlers = spec
                .handlers
                .iter()
                .map(|(matcher, name)| {
                    resolve_handler(name).map(|function| HandlerBinding {
                        matcher: matcher.clone(),
                        function,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            function_metas.push(Arc::new(FunctionMeta {
                name: spec.name.as_str().into(),
                team,
                body: Arc::clone(&spec.body),
                object_names: objects.iter().map(|&id| Arc::clone(&object_metas[id].name)).collect(),
                objects,
                next,
                flows,
                handlers,
            }));
        }

        let thread_handlers = thread_handlers
            .into_iter()
            .map(|(matcher, name)| resolve_handler(&name).map(|function| HandlerBinding { matcher, function }))
            .collect::<Result<Vec<_>, _>>()?;

        let bus = Bus::new(cfg.bus_capacity_clamped());
        let teams = teams
            .into_iter()
            .map(|(name, team)| TeamEntry {
                name: name.as_str().into(),
                team,
            })
            .collect();
        let monitor_interval = cfg.monitor_interval_clamped();
        let shared = Arc::new(Shared::new(
            cfg,
            bus,
            teams,
            function_metas,
            function_index,
            object_metas,
            object_index,
            thread_handlers,
            process_handler,
        ));

        start_components(&shared, monitor_interval)?;

        let listener = (!subscribers.is_empty()).then(|| spawn_listener(shared.bus.subscribe(), subscribers));
        shared.publish(Event::new(EventKind::KernelStarted));
        Ok(Kernel::new(shared, listener))
    }
}

/// Maps names to declaration indexes, rejecting duplicates.
fn index_names<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Result<HashMap<String, usize>, KernelError> {
    let mut index = HashMap::new();
    for (i, name) in names.enumerate() {
        if index.insert(name.to_string(), i).is_some() {
            return Err(KernelError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(index)
}

/// Depth-first search over object dependencies.
fn detect_cycle(objects: &[Arc<ObjectMeta>]) -> Result<(), KernelError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(id: usize, objects: &[Arc<ObjectMeta>], marks: &mut [Mark], path: &mut Vec<usize>) -> Result<(), KernelError> {
        match marks[id] {
            Mark::Done => return Ok(()),
            Mark::Active => {
                let start = path.iter().position(|&p| p == id).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|&p| objects[p].name.to_string()).collect();
                cycle.push(objects[id].name.to_string());
                return Err(KernelError::CyclicDependency { cycle });
            }
            Mark::New => {}
        }
        marks[id] = Mark::Active;
        path.push(id);
        for &dep in &objects[id].dependencies {
            visit(dep, objects, marks, path)?;
        }
        path.pop();
        marks[id] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::New; objects.len()];
    let mut path = Vec::new();
    for id in 0..objects.len() {
        visit(id, objects, &mut marks, &mut path)?;
    }
    Ok(())
}

/// Starts teams, the monitor and sources; stops what was started on failure.
fn start_components(shared: &Arc<Shared>, monitor_interval: std::time::Duration) -> Result<(), KernelError> {
    for (i, entry) in shared.teams.iter().enumerate() {
        if let Err(error) = entry.team.start() {
            for started in &shared.teams[..i] {
                started.team.stop();
            }
            return Err(KernelError::StartFailed {
                component: format!("team '{}'", entry.name),
                error: error.to_string(),
            });
        }
    }

    if let Err(error) = shared.monitor.start(monitor_interval) {
        for entry in &shared.teams {
            entry.team.stop();
        }
        return Err(KernelError::StartFailed {
            component: "monitor".into(),
            error: error.to_string(),
        });
    }

    for (i, meta) in shared.objects.iter().enumerate() {
        let invoker = FlowInvoker::new(Arc::downgrade(shared), meta.id, Arc::clone(&meta.name));
        let ctx = StartContext::new(Arc::clone(&meta.name), invoker);
        if let Err(error) = meta.source.start(&ctx) {
            for started in &shared.objects[..i] {
                started.source.stop();
            }
            for entry in &shared.teams {
                entry.team.stop();
            }
            shared.monitor.stop();
            return Err(KernelError::SourceStart {
                object: meta.name.to_string(),
                error: format!("{error:#}"),
            });
        }
    }
    Ok(())
}

/// Forwards bus events to the subscriber set until cancelled, then drains.
fn spawn_listener(
    mut rx: broadcast::Receiver<Event>,
    subscribers: Vec<Arc<dyn Subscribe>>,
) -> (CancellationToken, JoinHandle<()>) {
    let set = SubscriberSet::new(subscribers);
    let token = CancellationToken::new();
    let stop = token.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) => set.emit(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber listener lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        while let Ok(event) = rx.try_recv() {
            set.emit(&event);
        }
        set.shutdown().await;
    });
    (token, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{SourceFn, Sourced};
    use crate::team::PassiveTeam;

    fn noop(name: &str, team: &str) -> FunctionSpec {
        FunctionSpec::new(name, team, |_| Ok(()))
    }

    fn object(name: &str, scope: Scope) -> ObjectSpec {
        ObjectSpec::new(name, scope, SourceFn::new(|_| Ok(Sourced::ready(()))))
    }

    fn builder() -> KernelBuilder {
        KernelBuilder::new(KernelConfig::default()).team("main", PassiveTeam::new())
    }

    #[test]
    fn test_unknown_team_rejected() {
        let err = builder().function(noop("f", "gpu")).build().unwrap_err();
        assert_eq!(
            err,
            KernelError::UnknownTeam {
                function: "f".into(),
                team: "gpu".into()
            }
        );
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let err = builder()
            .function(noop("f", "main"))
            .function(noop("f", "main"))
            .build()
            .unwrap_err();
        assert_eq!(err.as_label(), "kernel_duplicate_name");
    }

    #[test]
    fn test_unknown_next_and_handler_rejected() {
        let err = builder().function(noop("f", "main").next("g")).build().unwrap_err();
        assert_eq!(err.as_label(), "kernel_unknown_flow_target");

        let err = builder()
            .function(noop("f", "main").handle(EscalationMatcher::Any, "h"))
            .build()
            .unwrap_err();
        assert_eq!(err, KernelError::UnknownFunction { name: "h".into() });
    }

    #[test]
    fn test_unknown_bound_object_rejected() {
        let err = builder().function(noop("f", "main").object("db")).build().unwrap_err();
        assert_eq!(
            err,
            KernelError::UnknownObject {
                referrer: "f".into(),
                object: "db".into()
            }
        );
    }

    #[test]
    fn test_dependency_cycle_rejected() {
        let err = builder()
            .object(object("a", Scope::Process).depends_on("b"))
            .object(object("b", Scope::Process).depends_on("a"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            KernelError::CyclicDependency {
                cycle: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_narrower_dependency_rejected() {
        let err = builder()
            .object(object("conn", Scope::Process).depends_on("tx"))
            .object(object("tx", Scope::Thread))
            .build()
            .unwrap_err();
        assert_eq!(err.as_label(), "kernel_scope_violation");
    }

    #[test]
    fn test_trigger_must_be_process_scoped() {
        let err = builder()
            .function(noop("on_request", "main"))
            .object(object("socket", Scope::Thread).flow("on_request"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            KernelError::TriggerNotProcessScoped {
                object: "socket".into()
            }
        );
    }

    #[test]
    fn test_failing_source_start_reported() {
        struct Broken;
        impl crate::ManagedObjectSource for Broken {
            fn start(&self, _ctx: &StartContext) -> anyhow::Result<()> {
                anyhow::bail!("port in use")
            }
            fn source(&self, _ctx: &crate::SourceContext) -> anyhow::Result<Sourced> {
                Ok(Sourced::Pending)
            }
        }
        let err = builder()
            .object(ObjectSpec::new("listener", Scope::Process, Broken))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            KernelError::SourceStart {
                object: "listener".into(),
                error: "port in use".into()
            }
        );
    }
}
