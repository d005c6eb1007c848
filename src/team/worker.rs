//! # WorkerTeam: fixed pool of OS threads.
//!
//! Jobs go through a bounded crossbeam channel. A full channel is reported as
//! back-pressure immediately; the submitter never waits for room.
//!
//! ```text
//! submit ──try_send──► [ bounded queue ] ──► worker-0 ─► job.run()
//!                                        ├─► worker-1 ─► job.run()
//!                                        └─► worker-N ─► job.run()
//! ```

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};

use super::{BackPressure, Job, Team};

/// Team backed by `workers` OS threads and a queue of `capacity` jobs.
pub struct WorkerTeam {
    name: String,
    workers: usize,
    capacity: usize,
    tx: RwLock<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerTeam {
    /// Creates a stopped team; the kernel starts it on build.
    ///
    /// `workers` and `capacity` are clamped to at least one.
    pub fn new(name: impl Into<String>, workers: usize, capacity: usize) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            capacity: capacity.max(1),
            tx: RwLock::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Thread name prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of jobs that can wait in the queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Team for WorkerTeam {
    fn submit(&self, job: Job) -> Result<(), BackPressure> {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            return Err(BackPressure::new("team not running"));
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(BackPressure::new("queue full")),
            Err(TrySendError::Disconnected(_)) => Err(BackPressure::new("team stopped")),
        }
    }

    fn start(&self) -> std::io::Result<()> {
        let mut slot = self.tx.write();
        if slot.is_some() {
            return Ok(());
        }
        let (tx, rx) = channel::bounded::<Job>(self.capacity);
        let mut handles = self.handles.lock();
        for i in 0..self.workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{i}", self.name))
                .spawn(move || {
                    for job in rx.iter() {
                        job.run();
                    }
                })?;
            handles.push(handle);
        }
        *slot = Some(tx);
        Ok(())
    }

    fn stop(&self) {
        // Workers exit once the queue drains and the sender is gone.
        self.tx.write().take();
        let current = thread::current().id();
        for handle in self.handles.lock().drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WorkerTeam {
    fn drop(&mut self) {
        self.tx.get_mut().take();
    }
}
