//! Shutdown coordination for the service.
//!
//! # State Machine
//! ```text
//! Running ──signal──▶ Draining ──stop ok──────▶ Stopped
//!                        │─────deadline hit──▶ TimedOut
//!                        └─────stop/listen err▶ Failed
//! Running ──listener error──────────────────▶ Failed
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::lifecycle::context::{CancelCause, CancelHandle, Context};
use crate::lifecycle::signals::SignalWatcher;
use crate::net::listener::{ListenerError, ServiceListener, StopError};

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Accept loop active, signal watcher armed.
    Running,
    /// Root cancelled, bounded stop in progress.
    Draining,
    /// Every in-flight connection finished before the deadline.
    Stopped,
    /// The deadline passed and remaining connections were force-closed.
    TimedOut,
    /// The listener or the stop operation failed.
    Failed,
}

/// Listener-lifecycle failures visible to the coordinator.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("listener failed: {0}")]
    Listener(#[from] ListenerError),

    #[error("graceful shutdown timed out after {deadline:?} with {remaining} connection(s) still open")]
    DrainTimedOut { deadline: Duration, remaining: u64 },

    #[error("graceful shutdown failed: {0}")]
    Stop(#[source] StopError),
}

/// Final result of a process lifetime, as seen by the exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Clean,
    TimedOut,
    ListenerError,
}

impl DrainOutcome {
    pub fn from_result(result: &Result<(), ShutdownError>) -> Self {
        match result {
            Ok(()) => DrainOutcome::Clean,
            Err(ShutdownError::DrainTimedOut { .. }) => DrainOutcome::TimedOut,
            Err(_) => DrainOutcome::ListenerError,
        }
    }

    /// Process exit status: zero only for a clean drain.
    pub fn exit_code(self) -> u8 {
        match self {
            DrainOutcome::Clean => 0,
            DrainOutcome::TimedOut | DrainOutcome::ListenerError => 1,
        }
    }

    /// Log the outcome as one of three distinct lines and return it.
    pub fn report(result: &Result<(), ShutdownError>) -> Self {
        let outcome = Self::from_result(result);
        match result {
            Ok(()) => tracing::info!("Server has shut down gracefully"),
            Err(err @ ShutdownError::DrainTimedOut { .. }) => {
                tracing::warn!(error = %err, "Server shut down with requests still in flight")
            }
            Err(err) => tracing::error!(error = %err, "Server stopped with a fatal error"),
        }
        outcome
    }
}

/// Orchestrates signal → cancel → bounded stop.
///
/// Owns the root cancel trigger; nothing else may cancel the root.
pub struct Coordinator {
    cancel: CancelHandle,
    shutdown_timeout: Duration,
    state: watch::Sender<ShutdownState>,
}

impl Coordinator {
    pub fn new(cancel: CancelHandle, shutdown_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            cancel,
            shutdown_timeout,
            state,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Run the listener until a signal arrives, then drain it.
    ///
    /// The accept loop and the signal wait run concurrently; the first error
    /// from either ends the other. The root context is cancelled on every
    /// exit path.
    pub async fn run<L, W>(self, listener: &L, watcher: W) -> Result<(), ShutdownError>
    where
        L: ServiceListener,
        W: SignalWatcher,
    {
        let Coordinator {
            cancel,
            shutdown_timeout,
            state,
        } = self;
        let root = cancel.drop_guard(CancelCause::ServerStopped);

        let serve = async {
            listener.run_until_stopped().await?;
            tracing::debug!("Accept loop returned");
            Ok::<(), ShutdownError>(())
        };

        let drain = async {
            let signal = watcher.wait().await;
            tracing::info!(%signal, "Termination signal received, starting shutdown sequence");
            state.send_replace(ShutdownState::Draining);

            // Cancel first so in-flight handlers abort their downstream calls.
            root.handle().cancel(CancelCause::Shutdown(signal));

            // A fresh context: the root is already cancelled and would end the drain at once.
            let deadline = Context::background().with_timeout(shutdown_timeout);
            tracing::info!(timeout = ?shutdown_timeout, "Stopping listener");

            listener
                .begin_graceful_stop(&deadline)
                .await
                .map_err(|err| match err {
                    StopError::DeadlineExceeded { remaining } => ShutdownError::DrainTimedOut {
                        deadline: shutdown_timeout,
                        remaining,
                    },
                    other => ShutdownError::Stop(other),
                })
        };

        let result = tokio::try_join!(serve, drain).map(|_| ());

        state.send_replace(match &result {
            Ok(()) => ShutdownState::Stopped,
            Err(ShutdownError::DrainTimedOut { .. }) => ShutdownState::TimedOut,
            Err(_) => ShutdownState::Failed,
        });
        drop(root);

        result
    }
}
