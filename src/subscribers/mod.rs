//! # Event subscribers for the flowvisor kernel.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and built-in implementations for handling kernel events broadcast through
//! the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   ThreadState ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet
//!                                                                        │
//!                                                             ┌──────────┼──────────┐
//!                                                             ▼          ▼          ▼
//!                                                         LogWriter   Metrics    Custom
//! ```

mod embedded;
mod set;
mod subscribe;

#[allow(unused_imports)]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
