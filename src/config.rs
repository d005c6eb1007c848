//! # Global kernel configuration.
//!
//! Provides [`KernelConfig`], centralized settings for the execution kernel.
//!
//! Config is used in two ways:
//! 1. **Kernel creation**: `Kernel::builder(config)`
//! 2. **Object defaults**: an [`ObjectSpec`](crate::ObjectSpec) without its own
//!    timeout inherits [`KernelConfig::default_async_timeout`].
//!
//! ## Sentinel values
//! - `async_timeout = 0s` → asynchronous operations never time out
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

/// Global configuration for the kernel runtime.
///
/// ## Field semantics
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `async_timeout`: Default timeout of asynchronous object operations (`0s` = none)
/// - `monitor_interval`: Tick of the timeout monitor thread
/// - `grace`: Maximum wait for in-flight processes on shutdown
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages will
    /// skip older items. Minimum value is 1 (enforced by Bus).
    pub bus_capacity: usize,

    /// Default timeout for asynchronous Managed Object operations.
    ///
    /// - `Duration::ZERO` = no timeout
    /// - `> 0` = a container left pending for longer fails with `Escalation::Timeout`
    ///
    /// Overridden per object by `ObjectSpec::with_timeout`.
    pub async_timeout: Duration,

    /// How often the monitor thread checks pending operations for timeouts.
    ///
    /// Timeouts are therefore detected with a resolution of one interval.
    pub monitor_interval: Duration,

    /// Maximum time `Kernel::shutdown` waits for in-flight processes.
    pub grace: Duration,
}

impl KernelConfig {
    /// Returns the default async operation timeout as an `Option`.
    ///
    /// - `None` → no timeout
    /// - `Some(d)` → pending operations fail after `d`
    #[inline]
    pub fn default_async_timeout(&self) -> Option<Duration> {
        if self.async_timeout == Duration::ZERO {
            None
        } else {
            Some(self.async_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the monitor tick, never shorter than one millisecond.
    #[inline]
    pub fn monitor_interval_clamped(&self) -> Duration {
        self.monitor_interval.max(Duration::from_millis(1))
    }
}

impl Default for KernelConfig {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `async_timeout = 0s` (no timeout)
    /// - `monitor_interval = 50ms`
    /// - `grace = 30s`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            async_timeout: Duration::ZERO,
            monitor_interval: Duration::from_millis(50),
            grace: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeout_means_none() {
        let cfg = KernelConfig::default();
        assert_eq!(cfg.default_async_timeout(), None);

        let cfg = KernelConfig {
            async_timeout: Duration::from_millis(250),
            ..KernelConfig::default()
        };
        assert_eq!(cfg.default_async_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_clamps() {
        let cfg = KernelConfig {
            bus_capacity: 0,
            monitor_interval: Duration::ZERO,
            ..KernelConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.monitor_interval_clamped(), Duration::from_millis(1));
    }
}
