//! # Kernel: invocation entry points and lifecycle.
//!
//! The [`Kernel`] is built once from declarations (see
//! [`KernelBuilder`](super::KernelBuilder)) and then accepts invocations. Each
//! invocation starts a process whose outcome is observable through the
//! returned [`ProcessHandle`], an optional completion callback and the event
//! bus.
//!
//! ```text
//! invoke(Invocation) ──► ProcessState ──► ThreadState(entry) ──► teams ...
//!        │                                                          │
//!        └──► ProcessHandle ◄──────── outcome (watch) ◄─────── last thread done
//!
//! FlowInvoker (held by object sources) ──► same path, triggered externally
//!
//! shutdown(): stop accepting ─► wait for in-flight processes (grace)
//!             ─► abandon stragglers (Escalation::Shutdown) ─► stop teams, sources, monitor
//! ```

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::flow::{Branch, BranchParent, FlowNode};
use super::process::{CompletionCallback, Outcome, ProcessState};
use super::shared::Shared;
use super::thread::ThreadState;
use super::{ProcessId, shutdown};
use crate::config::KernelConfig;
use crate::error::{Escalation, KernelError, RuntimeError};
use crate::events::{Event, EventKind};
use crate::function::{Argument, EscalationHandler};
use crate::object::{ObjectRef, Scope};

/// # Request to start a process.
///
/// ```rust
/// use std::time::Duration;
/// use flowvisor::{Argument, Invocation};
///
/// let invocation = Invocation::new("accept")
///     .with_argument(Argument::new(10u32))
///     .with_timeout(Duration::from_secs(1))
///     .on_complete(|failure| assert!(failure.is_none()));
/// # let _ = invocation;
/// ```
pub struct Invocation {
    function: String,
    argument: Argument,
    trigger: Option<(String, ObjectRef)>,
    timeout: Option<Duration>,
    callback: Option<CompletionCallback>,
    handler: Option<EscalationHandler>,
}

impl Invocation {
    /// Invokes `function` as the entry of a new process.
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            argument: Argument::none(),
            trigger: None,
            timeout: None,
            callback: None,
            handler: None,
        }
    }

    /// Argument passed to the entry function.
    pub fn with_argument(mut self, argument: Argument) -> Self {
        self.argument = argument;
        self
    }

    /// Supplies the instance of a process-scoped object up front.
    pub fn with_trigger(mut self, object: impl Into<String>, instance: ObjectRef) -> Self {
        self.trigger = Some((object.into(), instance));
        self
    }

    /// Timeout for asynchronous operations on the triggering object.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Called once when the process completes, with its failure if any.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Option<Escalation>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Process-level escalation handler for this process.
    ///
    /// Takes precedence over the kernel-wide process handler.
    pub fn with_escalation_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Escalation) -> Result<(), Escalation> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("function", &self.function)
            .field("trigger", &self.trigger.as_ref().map(|(name, _)| name))
            .field("timeout", &self.timeout)
            .field("callback", &self.callback.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// # Observer of a running process.
///
/// Cheap to clone. The outcome is set exactly once, after every object of the
/// process has been recycled.
#[derive(Clone)]
pub struct ProcessHandle {
    id: ProcessId,
    outcome: watch::Receiver<Outcome>,
}

impl ProcessHandle {
    /// Process id.
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// True once the process completed.
    pub fn is_complete(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// The outcome, if the process completed.
    pub fn outcome(&self) -> Option<Result<(), Escalation>> {
        self.outcome.borrow().clone()
    }

    /// Waits for the process to complete.
    pub async fn completed(&self) -> Result<(), Escalation> {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(Escalation::Shutdown))
    }

    /// Blocks the calling OS thread until the process completes.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(&self) -> Result<(), Escalation> {
        futures::executor::block_on(self.completed())
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// # Starts processes from an object's declared flows.
///
/// Handed to object sources through [`StartContext`](crate::StartContext);
/// also available from [`Kernel::flow_invoker`]. Holds the kernel weakly.
#[derive(Clone)]
pub struct FlowInvoker {
    shared: Weak<Shared>,
    object: usize,
    name: Arc<str>,
}

impl FlowInvoker {
    pub(crate) fn new(shared: Weak<Shared>, object: usize, name: Arc<str>) -> Self {
        Self { shared, object, name }
    }

    /// Name of the object whose flows this invoker starts.
    pub fn object_name(&self) -> &str {
        &self.name
    }

    /// Starts a process at flow `index` of the object.
    ///
    /// With `trigger`, the instance becomes the process's instance of the
    /// object and `timeout` bounds its asynchronous operations.
    pub fn invoke_flow(
        &self,
        index: usize,
        argument: Argument,
        trigger: Option<ObjectRef>,
        timeout: Option<Duration>,
        callback: Option<CompletionCallback>,
    ) -> Result<ProcessHandle, KernelError> {
        let shared = self.shared.upgrade().ok_or(KernelError::Closed)?;
        let entry = shared.objects[self.object]
            .flows
            .get(index)
            .copied()
            .ok_or_else(|| KernelError::UnknownFlow {
                owner: self.name.to_string(),
                index,
            })?;
        let trigger = trigger.map(|instance| (self.object, instance));
        shared.start_process(entry, argument, trigger, timeout, callback, None)
    }
}

impl fmt::Debug for FlowInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowInvoker")
            .field("object", &self.name)
            .field("live", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl Shared {
    pub(crate) fn start_process(
        self: &Arc<Self>,
        entry: usize,
        argument: Argument,
        trigger: Option<(usize, ObjectRef)>,
        timeout: Option<Duration>,
        callback: Option<CompletionCallback>,
        handler: Option<EscalationHandler>,
    ) -> Result<ProcessHandle, KernelError> {
        if self.closed.is_cancelled() {
            return Err(KernelError::Closed);
        }
        let function = Arc::clone(&self.functions[entry]);
        let process = ProcessState::new(Arc::clone(self), Arc::clone(&function.name), handler, callback);
        if let Some((object, instance)) = trigger {
            process.install_trigger(object, instance, timeout);
        }
        let handle = ProcessHandle {
            id: process.id,
            outcome: process.subscribe(),
        };

        self.tracker.insert(&process);
        self.publish(
            Event::new(EventKind::ProcessStarted)
                .with_process(process.id.get())
                .with_function(Arc::clone(&function.name)),
        );
        let node = FlowNode::new(function, argument, Branch::new(BranchParent::Thread, None));
        ThreadState::start(&process, node);
        Ok(handle)
    }
}

/// # The execution kernel.
///
/// Dropping the kernel stops its teams, sources and monitor without waiting;
/// use [`Kernel::shutdown`] to let in-flight processes finish first.
pub struct Kernel {
    shared: Arc<Shared>,
    listener: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Kernel {
    pub(crate) fn new(shared: Arc<Shared>, listener: Option<(CancellationToken, JoinHandle<()>)>) -> Self {
        Self {
            shared,
            listener: Mutex::new(listener),
        }
    }

    /// Starts a builder with the given configuration.
    pub fn builder(cfg: KernelConfig) -> super::KernelBuilder {
        super::KernelBuilder::new(cfg)
    }

    /// The kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.shared.cfg
    }

    /// Starts a process.
    pub fn invoke(&self, invocation: Invocation) -> Result<ProcessHandle, KernelError> {
        let Invocation {
            function,
            argument,
            trigger,
            timeout,
            callback,
            handler,
        } = invocation;

        let entry = self
            .shared
            .function_index
            .get(&function)
            .copied()
            .ok_or_else(|| KernelError::UnknownFunction { name: function.clone() })?;

        let trigger = match trigger {
            Some((object, instance)) => {
                let id = self
                    .shared
                    .object_index
                    .get(&object)
                    .copied()
                    .ok_or_else(|| KernelError::UnknownObject {
                        referrer: function.clone(),
                        object: object.clone(),
                    })?;
                if self.shared.objects[id].scope != Scope::Process {
                    return Err(KernelError::TriggerNotProcessScoped { object });
                }
                Some((id, instance))
            }
            None => None,
        };

        self.shared
            .start_process(entry, argument, trigger, timeout, callback, handler)
    }

    /// Shorthand for invoking `function` with `argument`.
    pub fn invoke_process(&self, function: &str, argument: Argument) -> Result<ProcessHandle, KernelError> {
        self.invoke(Invocation::new(function).with_argument(argument))
    }

    /// Invoker for the flows declared by `object`.
    pub fn flow_invoker(&self, object: &str) -> Result<FlowInvoker, KernelError> {
        let id = self
            .shared
            .object_index
            .get(object)
            .copied()
            .ok_or_else(|| KernelError::UnknownObject {
                referrer: "kernel".into(),
                object: object.to_string(),
            })?;
        Ok(FlowInvoker::new(
            Arc::downgrade(&self.shared),
            id,
            Arc::clone(&self.shared.objects[id].name),
        ))
    }

    /// Ids of processes that have not completed yet.
    pub fn active_processes(&self) -> Vec<ProcessId> {
        self.shared.tracker.snapshot()
    }

    /// Subscribes to the raw event stream.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    /// Graceful shutdown.
    ///
    /// Stops accepting invocations, waits up to [`KernelConfig::grace`] for
    /// in-flight processes, then abandons the rest with
    /// [`Escalation::Shutdown`] and stops teams, sources and the monitor.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.shared.publish(Event::new(EventKind::KernelStopping));
        self.shared.closed.cancel();

        let grace = self.shared.cfg.grace;
        let result = match tokio::time::timeout(grace, self.shared.tracker.wait_idle()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let stuck = self.shared.tracker.snapshot();
                let listed: Vec<String> = stuck.iter().map(ToString::to_string).collect();
                self.shared
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(listed.join(", ")));
                for process in self.shared.tracker.live() {
                    process.fail(Escalation::Shutdown);
                }
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };

        self.shared.stop_components();
        let listener = self.listener.lock().take();
        if let Some((token, handle)) = listener {
            token.cancel();
            let _ = handle.await;
        }
        result
    }

    /// Waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then shuts down.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        self.shutdown_on(async {
            match shutdown::termination().await {
                Ok(signal) => tracing::info!(signal = signal.as_str(), "termination signal received"),
                Err(error) => tracing::warn!(%error, "signal registration failed; shutting down"),
            }
        })
        .await
    }

    /// Keeps serving until `trigger` resolves, then shuts down gracefully.
    pub async fn shutdown_on<F>(&self, trigger: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()>,
    {
        trigger.await;
        self.shutdown().await
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shared.stop_components();
        if let Some((token, _)) = self.listener.get_mut().take() {
            token.cancel();
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("teams", &self.shared.teams.len())
            .field("functions", &self.shared.functions.len())
            .field("objects", &self.shared.objects.len())
            .field("active", &self.shared.tracker.snapshot().len())
            .finish()
    }
}
