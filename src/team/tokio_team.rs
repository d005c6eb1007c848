//! # TokioTeam: blocking pool of a tokio runtime.
//!
//! Each accepted job runs via [`Handle::spawn_blocking`]. Capacity is a
//! semaphore acquired with `try_acquire_owned`, so a saturated team reports
//! back-pressure instead of queueing. The permit is held until the job returns.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, TryAcquireError};

use super::{BackPressure, Job, Team};

/// Team running jobs on tokio's blocking thread pool.
pub struct TokioTeam {
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
}

impl TokioTeam {
    /// Creates a team on `handle` allowing `max_concurrent` running jobs.
    ///
    /// `0` means unlimited (bounded only by tokio's blocking pool).
    pub fn new(handle: Handle, max_concurrent: usize) -> Self {
        let permits = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self { handle, permits }
    }

    /// Creates a team on the runtime of the calling context.
    ///
    /// Fails when called outside a tokio runtime.
    pub fn current(max_concurrent: usize) -> Result<Self, tokio::runtime::TryCurrentError> {
        Ok(Self::new(Handle::try_current()?, max_concurrent))
    }

    /// Free permits, or `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }
}

impl Team for TokioTeam {
    fn submit(&self, job: Job) -> Result<(), BackPressure> {
        let permit = match &self.permits {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(p) => Some(p),
                Err(TryAcquireError::NoPermits) => return Err(BackPressure::new("no free permits")),
                Err(TryAcquireError::Closed) => return Err(BackPressure::new("team stopped")),
            },
            None => None,
        };
        self.handle.spawn_blocking(move || {
            let _permit = permit;
            job.run();
        });
        Ok(())
    }

    fn stop(&self) {
        if let Some(sem) = &self.permits {
            sem.close();
        }
    }
}
