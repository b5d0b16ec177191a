//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Resolve a one-shot event naming the signal that fired
//! - Provide a synthetic source so tests can drive shutdown
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered eagerly so failures surface at startup
//! - All termination signals are treated identically; the kind is for logs
//! - The watcher is consumed by `wait`, so an event is delivered at most once

use std::fmt;
use std::future::Future;
use std::io;

use tokio::sync::oneshot;

/// A process-level termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    /// Interactive interrupt (Ctrl+C, SIGINT).
    Interrupt,
    /// Process termination request (SIGTERM), sent by Cloud Run and `kill`.
    Terminate,
}

impl TerminationSignal {
    /// Both signals the service reacts to.
    pub const ALL: [TerminationSignal; 2] = [TerminationSignal::Interrupt, TerminationSignal::Terminate];
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Interrupt => write!(f, "SIGINT"),
            TerminationSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// A one-shot source of termination events.
pub trait SignalWatcher: Send + 'static {
    /// Wait for the first termination signal.
    fn wait(self) -> impl Future<Output = TerminationSignal> + Send;
}

/// Watches real process signals.
pub struct OsSignalWatcher {
    #[cfg(unix)]
    interrupt: Option<tokio::signal::unix::Signal>,
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
    #[cfg(not(unix))]
    interrupt: bool,
}

/// Register interest in `signals`.
///
/// Registration errors are returned here rather than when waiting. Note that
/// once Tokio installs a handler for a signal kind it stays installed for the
/// life of the process, even after the watcher is dropped.
pub fn watch_for_termination(signals: &[TerminationSignal]) -> io::Result<OsSignalWatcher> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signals
            .contains(&TerminationSignal::Interrupt)
            .then(|| signal(SignalKind::interrupt()))
            .transpose()?;
        let terminate = signals
            .contains(&TerminationSignal::Terminate)
            .then(|| signal(SignalKind::terminate()))
            .transpose()?;

        tracing::debug!(?signals, "Signal handlers installed");
        Ok(OsSignalWatcher {
            interrupt,
            terminate,
        })
    }

    #[cfg(not(unix))]
    {
        tracing::debug!(?signals, "Signal handlers installed");
        Ok(OsSignalWatcher {
            interrupt: signals.contains(&TerminationSignal::Interrupt),
        })
    }
}

#[cfg(unix)]
async fn recv_or_pending(signal: Option<&mut tokio::signal::unix::Signal>) {
    match signal {
        Some(signal) => {
            if signal.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

impl SignalWatcher for OsSignalWatcher {
    #[cfg(unix)]
    async fn wait(mut self) -> TerminationSignal {
        tokio::select! {
            _ = recv_or_pending(self.interrupt.as_mut()) => TerminationSignal::Interrupt,
            _ = recv_or_pending(self.terminate.as_mut()) => TerminationSignal::Terminate,
        }
    }

    #[cfg(not(unix))]
    async fn wait(self) -> TerminationSignal {
        if !self.interrupt {
            std::future::pending::<()>().await;
        }
        loop {
            match tokio::signal::ctrl_c().await {
                Ok(()) => return TerminationSignal::Interrupt,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

/// In-process signal source for tests and embedding.
pub struct SyntheticSignal {
    rx: oneshot::Receiver<TerminationSignal>,
}

/// Fires the paired [`SyntheticSignal`].
#[derive(Debug)]
pub struct SignalTrigger {
    tx: oneshot::Sender<TerminationSignal>,
}

impl SyntheticSignal {
    pub fn new() -> (SignalTrigger, SyntheticSignal) {
        let (tx, rx) = oneshot::channel();
        (SignalTrigger { tx }, SyntheticSignal { rx })
    }
}

impl SignalTrigger {
    /// Deliver `signal`. Has no effect if the watcher is gone.
    pub fn fire(self, signal: TerminationSignal) {
        let _ = self.tx.send(signal);
    }
}

impl SignalWatcher for SyntheticSignal {
    async fn wait(self) -> TerminationSignal {
        match self.rx.await {
            Ok(signal) => signal,
            // Trigger dropped without firing: no signal will ever arrive.
            Err(_) => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn synthetic_signal_delivers_once() {
        let (trigger, watcher) = SyntheticSignal::new();
        trigger.fire(TerminationSignal::Terminate);
        assert_eq!(watcher.wait().await, TerminationSignal::Terminate);
    }

    #[tokio::test]
    async fn dropped_trigger_never_fires() {
        let (trigger, watcher) = SyntheticSignal::new();
        drop(trigger);
        let waited = tokio::time::timeout(Duration::from_millis(50), watcher.wait()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn signal_names() {
        assert_eq!(TerminationSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(TerminationSignal::Terminate.to_string(), "SIGTERM");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn os_watcher_sees_sigterm() {
        let watcher = watch_for_termination(&[TerminationSignal::Terminate]).unwrap();
        let waiting = tokio::spawn(watcher.wait());

        tokio::task::yield_now().await;
        let pid = std::process::id();
        std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status()
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal, TerminationSignal::Terminate);
    }
}
