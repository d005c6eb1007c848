//! # Event bus for broadcasting kernel events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from many sources (worker threads, async
//! listeners, the timeout monitor).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                      Subscriber (one):
//!   ThreadState ──┐
//!   Container   ──┼──────► Bus ───────► subscriber_listener ────► SubscriberSet
//!   Monitor     ──┤  (broadcast chan)       (in Kernel)
//!   Kernel      ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks and needs no runtime, so
//!   plain OS worker threads publish directly.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active subscribers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately.
/// - **Fire-and-forget**: no delivery or durability guarantees.
/// - **Cloneable**: cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (min 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn test_publish_without_receivers_is_silent() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::KernelStarted));
    }

    #[test]
    fn test_receiver_sees_published_event() {
        let bus = Bus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ProcessStarted).with_process(3));
        let ev = rx.try_recv().expect("event");
        assert_eq!(ev.kind, EventKind::ProcessStarted);
        assert_eq!(ev.process, Some(3));
    }
}
