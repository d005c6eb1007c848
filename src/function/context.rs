//! # FunctionContext: what a function body sees.

use std::any::{Any, type_name};

use super::{Argument, EscalationMatcher, FlowCallback};
use crate::core::{FlowNode, ProcessId, ThreadId};
use crate::error::{Escalation, FlowError, ObjectError};
use crate::object::ObjectRef;

pub(crate) struct FlowRequest {
    pub function: usize,
    pub argument: Argument,
    pub callback: Option<FlowCallback>,
}

/// Continuations requested by a function body.
#[derive(Default)]
pub(crate) struct FlowRequests {
    pub next: Option<Argument>,
    pub sub_flows: Vec<FlowRequest>,
    pub spawns: Vec<FlowRequest>,
}

/// # Execution context of one function invocation.
///
/// Bound objects are ready (LOADED) for the whole body. Flow requests are
/// recorded here and applied after the body returns `Ok`.
pub struct FunctionContext<'a> {
    node: &'a FlowNode,
    objects: &'a [ObjectRef],
    process: ProcessId,
    thread: ThreadId,
    requests: FlowRequests,
}

impl<'a> FunctionContext<'a> {
    pub(crate) fn new(node: &'a FlowNode, objects: &'a [ObjectRef], process: ProcessId, thread: ThreadId) -> Self {
        Self {
            node,
            objects,
            process,
            thread,
            requests: FlowRequests::default(),
        }
    }

    pub(crate) fn into_requests(self) -> FlowRequests {
        self.requests
    }

    /// Name of the executing function.
    pub fn function_name(&self) -> &str {
        &self.node.function.name
    }

    /// Process this invocation belongs to.
    pub fn process_id(&self) -> ProcessId {
        self.process
    }

    /// Thread state executing this invocation.
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// The invocation argument.
    pub fn argument(&self) -> &Argument {
        &self.node.argument
    }

    /// The escalation being handled, when this function runs as a handler.
    pub fn escalation(&self) -> Option<&Escalation> {
        self.node.argument.get::<Escalation>()
    }

    /// Bound object at `index`, downcast to `T`.
    pub fn object<T: Any + Send + Sync>(&self, index: usize) -> Result<&T, ObjectError> {
        self.object_ref(index)?
            .downcast_ref::<T>()
            .ok_or_else(|| ObjectError::TypeMismatch {
                object: self.object_name(index),
                expected: type_name::<T>(),
            })
    }

    /// Bound object at `index` without downcasting.
    pub fn object_ref(&self, index: usize) -> Result<&ObjectRef, ObjectError> {
        self.objects.get(index).ok_or_else(|| ObjectError::IndexOutOfRange {
            function: self.function_name().to_string(),
            index,
        })
    }

    /// Number of bound objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Requests the declared next function with `argument`.
    ///
    /// Without this call the next function (if declared) still runs, with an
    /// empty argument.
    pub fn next(&mut self, argument: Argument) -> Result<(), FlowError> {
        if self.node.function.next.is_none() {
            return Err(FlowError::NoNext {
                function: self.function_name().to_string(),
            });
        }
        self.requests.next = Some(argument);
        Ok(())
    }

    /// Requests flow `index` to run on this thread before `next`.
    ///
    /// Sub-flows run one after the other in request order. The callback sees
    /// the flow's outcome; without a callback an unhandled escalation moves on
    /// to this function's handlers.
    pub fn sub_flow(&mut self, index: usize, argument: Argument, callback: Option<FlowCallback>) -> Result<(), FlowError> {
        let function = self.flow_target(index)?;
        self.requests.sub_flows.push(FlowRequest {
            function,
            argument,
            callback,
        });
        Ok(())
    }

    /// Requests flow `index` to run on a new thread state of this process.
    ///
    /// The callback sees the spawned flow's outcome; without one an unhandled
    /// escalation moves on to the kernel's thread and process handlers.
    pub fn spawn_flow(&mut self, index: usize, argument: Argument, callback: Option<FlowCallback>) -> Result<(), FlowError> {
        let function = self.flow_target(index)?;
        self.requests.spawns.push(FlowRequest {
            function,
            argument,
            callback,
        });
        Ok(())
    }

    /// Registers a handler for escalations raised by this invocation.
    ///
    /// Runtime handlers are tried before the declared ones and also apply to
    /// failures of sub-flows requested by this invocation.
    pub fn on_escalation<F>(&mut self, matcher: EscalationMatcher, handler: F)
    where
        F: Fn(&Escalation) -> Result<(), Escalation> + Send + Sync + 'static,
    {
        self.node.add_handler(matcher, std::sync::Arc::new(handler));
    }

    fn flow_target(&self, index: usize) -> Result<usize, FlowError> {
        self.node
            .function
            .flows
            .get(index)
            .copied()
            .ok_or_else(|| FlowError::UnknownFlow {
                function: self.function_name().to_string(),
                index,
            })
    }

    fn object_name(&self, index: usize) -> String {
        self.node
            .function
            .object_names
            .get(index)
            .map(|n| n.to_string())
            .unwrap_or_default()
    }
}
