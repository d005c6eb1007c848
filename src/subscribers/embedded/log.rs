//! # LogWriter: event renderer backed by `tracing`
//!
//! A subscriber that turns incoming [`Event`]s into structured `tracing` records.
//! Install any `tracing` subscriber (e.g. `tracing_subscriber::fmt`) to see them.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO process started process=1 function="accept"
//! INFO function starting process=1 thread=1 function="accept" team="io"
//! WARN back pressure process=1 thread=1 function="parse" team="cpu" reason="queue full"
//! WARN process failed process=1 reason="team 'cpu' declined function 'parse': queue full"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let function = e.function.as_deref();
        let object = e.object.as_deref();
        let reason = e.reason.as_deref();
        match e.kind {
            EventKind::KernelStarted => tracing::info!("kernel started"),
            EventKind::KernelStopping => tracing::info!("kernel stopping"),
            EventKind::GraceExceeded => tracing::warn!(stuck = reason, "grace exceeded"),
            EventKind::ProcessStarted => {
                tracing::info!(process = e.process, function, "process started")
            }
            EventKind::ProcessCompleted => tracing::info!(process = e.process, "process completed"),
            EventKind::ProcessFailed => {
                tracing::warn!(process = e.process, reason, "process failed")
            }
            EventKind::ThreadSpawned | EventKind::ThreadCompleted => tracing::debug!(
                process = e.process,
                thread = e.thread,
                function,
                kind = ?e.kind,
                "thread state"
            ),
            EventKind::ThreadParked | EventKind::ThreadResumed => tracing::debug!(
                process = e.process,
                thread = e.thread,
                function,
                object,
                kind = ?e.kind,
                "thread suspension"
            ),
            EventKind::FunctionStarting | EventKind::FunctionCompleted => tracing::trace!(
                process = e.process,
                thread = e.thread,
                function,
                team = e.team.as_deref(),
                kind = ?e.kind,
                "function"
            ),
            EventKind::FunctionFailed => tracing::warn!(
                process = e.process,
                thread = e.thread,
                function,
                reason,
                "function failed"
            ),
            EventKind::BackPressure => tracing::warn!(
                process = e.process,
                thread = e.thread,
                function,
                team = e.team.as_deref(),
                reason,
                "back pressure"
            ),
            EventKind::ObjectSourced | EventKind::ObjectRecycled => {
                tracing::debug!(process = e.process, object, kind = ?e.kind, "object")
            }
            EventKind::ObjectFailed => tracing::warn!(object, reason, "object failed"),
            EventKind::ObjectTimeout => {
                tracing::warn!(object, timeout_ms = e.timeout_ms, "object timed out")
            }
            EventKind::RecycleFailed => tracing::warn!(object, reason, "recycle failed"),
            EventKind::EscalationHandled => tracing::info!(
                process = e.process,
                thread = e.thread,
                level = ?e.level,
                reason,
                "escalation handled"
            ),
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => tracing::warn!(
                subscriber = function.unwrap_or("unknown"),
                reason = reason.unwrap_or("unknown"),
                "subscriber trouble"
            ),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
