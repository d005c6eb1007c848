//! # PassiveTeam: execute on the submitting thread.
//!
//! The submitting thread runs the job itself. Jobs submitted while that thread
//! is already running a passive job are queued in a thread-local trampoline
//! and drained by the outermost call, so long chains of functions do not grow
//! the call stack.
//!
//! ```text
//! submit(A) ── run A ── submit(B) ─► queued
//!           │                         │
//!           └── drain ◄───────────────┘ run B ── submit(C) ─► queued ...
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;

use super::{BackPressure, Job, Team};

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Team that never declines and runs jobs on the caller's OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveTeam;

impl PassiveTeam {
    /// Creates a passive team.
    pub fn new() -> Self {
        Self
    }
}

/// Clears the trampoline even if a job unwinds.
struct Drain;

impl Drop for Drain {
    fn drop(&mut self) {
        TRAMPOLINE.with(|q| *q.borrow_mut() = None);
    }
}

impl Team for PassiveTeam {
    fn submit(&self, job: Job) -> Result<(), BackPressure> {
        let first = TRAMPOLINE.with(|q| {
            let mut q = q.borrow_mut();
            match q.as_mut() {
                Some(queue) => {
                    queue.push_back(job);
                    None
                }
                None => {
                    *q = Some(VecDeque::new());
                    Some(job)
                }
            }
        });
        let Some(first) = first else {
            return Ok(());
        };

        let _drain = Drain;
        first.run();
        while let Some(next) = TRAMPOLINE.with(|q| q.borrow_mut().as_mut().and_then(VecDeque::pop_front)) {
            next.run();
        }
        Ok(())
    }
}
