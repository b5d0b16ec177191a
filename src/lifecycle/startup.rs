//! Startup orchestration.
//!
//! # Responsibilities
//! - Create the root context and its cancel trigger
//! - Initialize subsystems in dependency order
//! - Bind the listener and hand everything to the coordinator
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The listener binds last (traffic only when ready)

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::ServiceConfig;
use crate::http::{build_router, AppState};
use crate::lifecycle::context::new_root;
use crate::lifecycle::shutdown::{Coordinator, ShutdownError, ShutdownState};
use crate::lifecycle::signals::SignalWatcher;
use crate::net::listener::{HttpListener, ListenerError};
use crate::upstream::UpstreamError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),
}

/// A bound service, ready to run.
pub struct Service {
    listener: HttpListener,
    coordinator: Coordinator,
}

impl Service {
    pub async fn bind(config: &ServiceConfig) -> Result<Self, StartupError> {
        let (root, cancel) = new_root();

        let state = AppState::from_config(config)?;
        tracing::info!(
            upstream = %state.upstream.base_url(),
            delay_secs = state.delay_secs,
            "Upstream client ready"
        );

        let router = build_router(state, config.observability.project_id.as_deref());
        let listener = HttpListener::bind(&config.listener, router, root)
            .await?
            .with_request_timeout(config.timeouts.request());

        let coordinator = Coordinator::new(cancel, config.shutdown.timeout());

        Ok(Self {
            listener,
            coordinator,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn state(&self) -> watch::Receiver<ShutdownState> {
        self.coordinator.state()
    }

    /// Serve until `watcher` fires, then drain.
    pub async fn run<W: SignalWatcher>(self, watcher: W) -> Result<(), ShutdownError> {
        let Service {
            listener,
            coordinator,
        } = self;
        tracing::info!(address = %listener.local_addr(), "Serving");
        coordinator.run(&listener, watcher).await
    }
}
