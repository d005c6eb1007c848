//! # Runtime events emitted by the kernel.
//!
//! The [`EventKind`] enum classifies event types across five categories:
//! - **Process/thread events**: lifecycle of logical invocations and strands
//! - **Function events**: job execution and back-pressure
//! - **Object events**: sourcing, async failures, timeouts, recycling
//! - **Escalation events**: which level handled a failure
//! - **Kernel/subscriber events**: start/stop, overflow, panics
//!
//! The [`Event`] struct carries additional metadata such as timestamps,
//! process/thread ids, function and object names.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use flowvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::FunctionFailed)
//!     .with_process(7)
//!     .with_function("parse")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::FunctionFailed);
//! assert_eq!(ev.function.as_deref(), Some("parse"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::core::EscalationLevel;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Kernel events ===
    /// Kernel built; teams, sources and monitor started.
    KernelStarted,

    /// Shutdown requested; no further invocations are accepted.
    KernelStopping,

    /// In-flight processes did not complete within the grace period.
    ///
    /// Sets:
    /// - `reason`: stuck process ids
    GraceExceeded,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `function`: subscriber name
    /// - `reason`: panic info
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `function`: subscriber name
    /// - `reason`: "full" or "closed"
    SubscriberOverflow,

    // === Process / thread lifecycle ===
    /// A process was created by an invocation or external trigger.
    ///
    /// Sets:
    /// - `process`, `function` (entry function)
    ProcessStarted,

    /// A process completed without failure (all objects recycled).
    ///
    /// Sets:
    /// - `process`
    ProcessCompleted,

    /// A process completed with a failure as its published result.
    ///
    /// Sets:
    /// - `process`, `reason`
    ProcessFailed,

    /// A parallel flow created a new thread state.
    ///
    /// Sets:
    /// - `process`, `thread`, `function`
    ThreadSpawned,

    /// A thread state finished its flow and recycled its objects.
    ///
    /// Sets:
    /// - `process`, `thread`
    ThreadCompleted,

    /// A thread state parked awaiting an asynchronous object.
    ///
    /// Sets:
    /// - `process`, `thread`, `function`, `object`
    ThreadParked,

    /// A parked thread state was resumed.
    ///
    /// Sets:
    /// - `process`, `thread`
    ThreadResumed,

    // === Function lifecycle ===
    /// A function body is about to execute.
    ///
    /// Sets:
    /// - `process`, `thread`, `function`, `team`
    FunctionStarting,

    /// A function body returned normally.
    FunctionCompleted,

    /// A function body returned an error or panicked.
    ///
    /// Sets:
    /// - `process`, `thread`, `function`, `reason`
    FunctionFailed,

    /// A team declined a job.
    ///
    /// Sets:
    /// - `process`, `thread`, `function`, `team`, `reason`
    BackPressure,

    // === Managed objects ===
    /// An object instance became available.
    ///
    /// Sets:
    /// - `object`, `process` (when known)
    ObjectSourced,

    /// Sourcing or an asynchronous operation failed.
    ///
    /// Sets:
    /// - `object`, `reason`
    ObjectFailed,

    /// An asynchronous operation exceeded its timeout.
    ///
    /// Sets:
    /// - `object`, `timeout_ms`
    ObjectTimeout,

    /// An object was recycled.
    ObjectRecycled,

    /// An object's recycle function failed.
    ///
    /// Sets:
    /// - `object`, `reason`
    RecycleFailed,

    // === Escalation ===
    /// A failure was consumed by a handler.
    ///
    /// Sets:
    /// - `process`, `thread`, `level`, `reason`
    EscalationHandled,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Process id, if applicable.
    pub process: Option<u64>,
    /// Thread state id, if applicable.
    pub thread: Option<u64>,
    /// Function name (or subscriber name for subscriber events).
    pub function: Option<Arc<str>>,
    /// Managed object name.
    pub object: Option<Arc<str>>,
    /// Team name.
    pub team: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Escalation level that handled a failure.
    pub level: Option<EscalationLevel>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            process: None,
            thread: None,
            function: None,
            object: None,
            team: None,
            reason: None,
            timeout_ms: None,
            level: None,
        }
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_process(mut self, id: u64) -> Self {
        self.process = Some(id);
        self
    }

    /// Attaches a thread state id.
    #[inline]
    pub fn with_thread(mut self, id: u64) -> Self {
        self.thread = Some(id);
        self
    }

    /// Attaches a function name.
    #[inline]
    pub fn with_function(mut self, function: impl Into<Arc<str>>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Attaches an object name.
    #[inline]
    pub fn with_object(mut self, object: impl Into<Arc<str>>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Attaches a team name.
    #[inline]
    pub fn with_team(mut self, team: impl Into<Arc<str>>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches the escalation level.
    #[inline]
    pub fn with_level(mut self, level: EscalationLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_function(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_function(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::ProcessStarted);
        let b = Event::new(EventKind::ProcessCompleted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_timeout_saturates() {
        let ev = Event::new(EventKind::ObjectTimeout).with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }
}
