//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the kernel, thread states,
//! object containers, the timeout monitor and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Kernel`, `ThreadState`, `ProcessState`, `Container`,
//!   the monitor thread, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the kernel's subscriber listener (fans out to `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
