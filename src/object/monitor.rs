//! # Monitor: expires asynchronous object operations.
//!
//! A single OS thread ticks at the configured interval and checks every
//! watched container against its deadline. Containers are held weakly and
//! dropped from the watch list once they leave OPERATION_PENDING.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::Container;

pub(crate) struct Monitor {
    watched: Mutex<Vec<Weak<Container>>>,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            watched: Mutex::new(Vec::new()),
            token: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the ticking thread.
    pub fn start(self: &Arc<Self>, interval: Duration) -> std::io::Result<()> {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return Ok(());
        }
        let monitor = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("flowvisor-monitor".into())
            .spawn(move || {
                let ticker = channel::tick(interval);
                while ticker.recv().is_ok() {
                    if monitor.token.is_cancelled() {
                        break;
                    }
                    monitor.check(Instant::now());
                }
            })?;
        *slot = Some(handle);
        Ok(())
    }

    pub fn watch(&self, container: Weak<Container>) {
        self.watched.lock().push(container);
    }

    /// Expires overdue containers; keeps the ones still pending.
    pub fn check(&self, now: Instant) {
        let watched = std::mem::take(&mut *self.watched.lock());
        let keep: Vec<Weak<Container>> = watched
            .into_iter()
            .filter(|w| w.upgrade().is_some_and(|c| c.check_timeout(now)))
            .collect();
        self.watched.lock().extend(keep);
    }

    #[cfg(test)]
    pub fn watched(&self) -> usize {
        self.watched.lock().len()
    }

    pub fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::container::ObjectState;
    use crate::core::ProcessId;
    use crate::events::Bus;
    use crate::object::{ContainerEnv, ObjectMeta, Scope, SourceFn, Sourced};

    fn pending_container(monitor: &Arc<Monitor>, timeout: Duration) -> Arc<Container> {
        let meta = Arc::new(ObjectMeta {
            id: 0,
            name: "socket".into(),
            object_type: "socket".into(),
            scope: Scope::Process,
            source: Arc::new(SourceFn::new(|_| Ok(Sourced::Pending))),
            dependencies: Vec::new(),
            timeout: Some(timeout),
            interest: Vec::new(),
            flows: Vec::new(),
        });
        let env = ContainerEnv {
            process: ProcessId::new(1),
            timeout: Some(timeout),
            bus: Bus::new(16),
            monitor: Arc::clone(monitor),
        };
        Container::preloaded(meta, Arc::new(()), env)
    }

    #[test]
    fn test_check_drops_completed_and_dead_entries() {
        let monitor = Arc::new(Monitor::new());
        let done = pending_container(&monitor, Duration::from_secs(60));
        let waiting = pending_container(&monitor, Duration::from_secs(60));
        assert!(done.start_operation());
        assert!(waiting.start_operation());
        assert_eq!(monitor.watched(), 2);

        done.complete_operation(Ok(()));
        monitor.check(Instant::now());
        assert_eq!(monitor.watched(), 1);

        drop(waiting);
        monitor.check(Instant::now());
        assert_eq!(monitor.watched(), 0);
    }

    #[test]
    fn test_thread_expires_overdue_operation() {
        let monitor = Arc::new(Monitor::new());
        monitor.start(Duration::from_millis(1)).unwrap();
        let c = pending_container(&monitor, Duration::from_millis(5));
        assert!(c.start_operation());

        let deadline = Instant::now() + Duration::from_secs(5);
        while c.state() != ObjectState::Failed && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        monitor.stop();
        assert_eq!(c.state(), ObjectState::Failed);
    }
}
