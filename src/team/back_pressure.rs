use std::borrow::Cow;

use thiserror::Error;

/// Returned by [`Team::submit`](crate::Team::submit) when the team declines a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("back pressure: {reason}")]
pub struct BackPressure {
    reason: Cow<'static, str>,
}

impl BackPressure {
    /// Creates a back-pressure report with a short reason ("queue full", ...).
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The reason given by the team.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}
