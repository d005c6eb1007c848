//! # Termination signals for [`Kernel::run_until_signal`](super::Kernel::run_until_signal).
//!
//! On unix the kernel listens for `SIGINT`, `SIGTERM` and `SIGQUIT`; elsewhere
//! only for Ctrl-C. Listeners are registered per call.

/// Signal that ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    Interrupt,
    #[cfg_attr(not(unix), allow(dead_code))]
    Terminate,
    #[cfg_attr(not(unix), allow(dead_code))]
    Quit,
}

impl Termination {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Termination::Interrupt => "SIGINT",
            Termination::Terminate => "SIGTERM",
            Termination::Quit => "SIGQUIT",
        }
    }
}

/// Resolves with the first termination signal received.
#[cfg(unix)]
pub(crate) async fn termination() -> std::io::Result<Termination> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| Termination::Interrupt),
        _ = terminate.recv() => Ok(Termination::Terminate),
        _ = quit.recv() => Ok(Termination::Quit),
    }
}

#[cfg(not(unix))]
pub(crate) async fn termination() -> std::io::Result<Termination> {
    tokio::signal::ctrl_c().await.map(|()| Termination::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(Termination::Interrupt.as_str(), "SIGINT");
        assert_eq!(Termination::Terminate.as_str(), "SIGTERM");
        assert_eq!(Termination::Quit.as_str(), "SIGQUIT");
    }
}
