//! # Teams: named worker pools that execute jobs.
//!
//! A [`Team`] decides **synchronously** at submission time whether it has
//! capacity. It never blocks the submitter: a team without capacity returns
//! [`BackPressure`], which the kernel raises as an escalation at the point of
//! invocation (the function body is never entered, and nothing is retried).
//!
//! ## Built-in teams
//! - [`PassiveTeam`]: runs the job on the submitting OS thread.
//! - [`WorkerTeam`]: fixed pool of OS threads behind a bounded queue.
//! - [`TokioTeam`]: `spawn_blocking` on a tokio runtime, capped by a semaphore.
//!
//! ## Contract
//! ```text
//! submit(job) ──► Ok(())            exactly one worker eventually calls job.run()
//!            └──► Err(BackPressure) job dropped, kernel escalates at the function
//! ```

mod back_pressure;
mod job;
mod passive;
mod tokio_team;
mod worker;

pub use back_pressure::BackPressure;
pub use job::Job;
pub use passive::PassiveTeam;
pub use tokio_team::TokioTeam;
pub use worker::WorkerTeam;

/// A named worker pool the kernel dispatches function jobs to.
///
/// Registered once at construction under a name; functions refer to the team
/// by that name and the kernel resolves it before any process starts.
pub trait Team: Send + Sync + 'static {
    /// Accepts the job for execution or reports back-pressure.
    ///
    /// Must not block. On `Ok`, the job's `run` must be called exactly once.
    fn submit(&self, job: Job) -> Result<(), BackPressure>;

    /// Called once when the kernel is built.
    fn start(&self) -> std::io::Result<()> {
        Ok(())
    }

    /// Called once when the kernel shuts down.
    fn stop(&self) {}
}
