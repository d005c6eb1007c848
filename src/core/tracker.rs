//! # Registry of in-flight processes.
//!
//! Processes are inserted on invocation and removed when they complete. The
//! tracker backs `Kernel::active_processes` and lets shutdown wait until the
//! kernel is idle, or abandon whatever is still running after the grace period.
//!
//! ```text
//! invoke() ──► insert(id) ──► ... ──► ProcessState::complete() ──► remove(id)
//!                                                                   │ empty?
//! shutdown() ── wait_idle() ◄──────────── notify_waiters() ◄────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::Notify;

use super::ProcessId;
use super::process::ProcessState;

pub(crate) struct ProcessTracker {
    alive: RwLock<BTreeMap<ProcessId, Weak<ProcessState>>>,
    idle: Notify,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self {
            alive: RwLock::new(BTreeMap::new()),
            idle: Notify::new(),
        }
    }

    pub fn insert(&self, process: &Arc<ProcessState>) {
        self.alive.write().insert(process.id, Arc::downgrade(process));
    }

    pub fn remove(&self, id: ProcessId) {
        let empty = {
            let mut alive = self.alive.write();
            alive.remove(&id);
            alive.is_empty()
        };
        if empty {
            self.idle.notify_waiters();
        }
    }

    /// Sorted ids of processes still running.
    pub fn snapshot(&self) -> Vec<ProcessId> {
        self.alive.read().keys().copied().collect()
    }

    pub fn live(&self) -> Vec<Arc<ProcessState>> {
        self.alive.read().values().filter_map(Weak::upgrade).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.read().is_empty()
    }

    /// Resolves once no process is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
