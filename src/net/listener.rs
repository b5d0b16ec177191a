//! TCP listener and HTTP accept loop with graceful stop.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections and serve HTTP/1.1 on each
//! - Derive a request context from the root for every request
//! - Stop accepting on request, drain in-flight connections, force-close at the deadline

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::config::ListenerConfig;
use crate::lifecycle::context::{derive_request_context, CancelCause, Context, ContextError};
use crate::net::connection::{ConnectionGuard, ConnectionTracker};

/// How long forced-closed connection tasks get to unwind before the stop call returns.
const FORCE_CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Pause before accepting again after running out of descriptors or memory.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Accept loop failed for a reason other than a graceful stop.
    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),

    /// `run_until_stopped` was called on a listener that already ran.
    #[error("Listener is already running or has stopped")]
    AlreadyRunning,
}

/// Error type for graceful stop.
#[derive(Debug, Error)]
pub enum StopError {
    /// The deadline passed with connections still open; they were force-closed.
    #[error("graceful stop deadline exceeded with {remaining} connection(s) still open")]
    DeadlineExceeded { remaining: u64 },

    /// The stop context was cancelled before the drain finished.
    #[error("graceful stop abandoned: {0}")]
    Canceled(CancelCause),
}

/// The network-facing half of the shutdown protocol.
pub trait ServiceListener: Send + Sync + 'static {
    /// Accept and dispatch connections until stopped.
    ///
    /// Returns `Ok(())` only for a graceful stop.
    fn run_until_stopped(&self) -> impl Future<Output = Result<(), ListenerError>> + Send;

    /// Stop accepting immediately, then wait for in-flight connections, bounded by `ctx`.
    fn begin_graceful_stop(
        &self,
        ctx: &Context,
    ) -> impl Future<Output = Result<(), StopError>> + Send;
}

/// An HTTP/1.1 listener that serves an axum router.
pub struct HttpListener {
    /// Taken by the accept loop; dropped when it exits so the socket closes.
    inner: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    router: Router,
    root: Context,
    request_timeout: Option<Duration>,
    tracker: ConnectionTracker,
    /// Wakes the accept loop and asks every connection to finish.
    stopping: CancellationToken,
    /// Drops every remaining connection.
    force_close: CancellationToken,
}

impl HttpListener {
    /// Bind to the configured address.
    pub async fn bind(
        config: &ListenerConfig,
        router: Router,
        root: Context,
    ) -> Result<Self, ListenerError> {
        let address = config.bind_address();
        let ip: IpAddr = config.host.parse().map_err(|e| ListenerError::Bind {
            address: address.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })?;

        let listener = TcpListener::bind(SocketAddr::new(ip, config.port))
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;

        Self::from_tcp(listener, router, root)
    }

    /// Wrap an already-bound socket.
    pub fn from_tcp(listener: TcpListener, router: Router, root: Context) -> Result<Self, ListenerError> {
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            address: "<bound socket>".to_string(),
            source,
        })?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self {
            inner: Mutex::new(Some(listener)),
            local_addr,
            router,
            root,
            request_timeout: None,
            tracker: ConnectionTracker::new(),
            stopping: CancellationToken::new(),
            force_close: CancellationToken::new(),
        })
    }

    /// Give every request context this deadline.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_accepting(&self) -> bool {
        self.tracker.is_accepting()
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, guard: ConnectionGuard) {
        let router = self.router.clone();
        let root = self.root.clone();
        let request_timeout = self.request_timeout;
        let stopping = self.stopping.clone();
        let force_close = self.force_close.clone();

        tokio::spawn(async move {
            let id = guard.id();
            tracing::debug!(connection_id = %id, peer_addr = %peer, "Connection accepted");

            let service = service_fn(move |mut request: Request<Incoming>| {
                let router = router.clone();
                let (ctx, cancel) = derive_request_context(&root, request_timeout);
                request.extensions_mut().insert(ctx);
                async move {
                    // Dropped when the response is ready or the connection goes away.
                    let _scope = cancel.drop_guard(CancelCause::RequestFinished);
                    router.oneshot(request).await
                }
            });

            let conn = http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(err) = result {
                            tracing::debug!(connection_id = %id, error = %err, "Connection error");
                        }
                        break;
                    }
                    _ = stopping.cancelled(), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                    _ = force_close.cancelled() => {
                        tracing::warn!(
                            connection_id = %id,
                            peer_addr = %peer,
                            "Forcing connection closed at shutdown deadline"
                        );
                        break;
                    }
                }
            }

            drop(guard);
        });
    }
}

impl ServiceListener for HttpListener {
    async fn run_until_stopped(&self) -> Result<(), ListenerError> {
        let listener = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ListenerError::AlreadyRunning)?;

        tracing::info!(address = %self.local_addr, "HTTP server starting");

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = self.stopping.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) if is_connection_error(&err) => {
                        tracing::debug!(error = %err, "Transient accept error");
                        continue;
                    }
                    Err(err) if is_resource_exhaustion(&err) => {
                        tracing::warn!(
                            error = %err,
                            backoff = ?ACCEPT_BACKOFF,
                            "Out of resources accepting connections, backing off"
                        );
                        tokio::select! {
                            biased;
                            _ = self.stopping.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "Accept loop failed");
                        return Err(ListenerError::Accept(err));
                    }
                },
            };

            // Admission closed between accept and here: drop the socket unserved.
            let Some(guard) = self.tracker.try_track() else {
                tracing::debug!(peer_addr = %peer, "Rejecting connection accepted during stop");
                break;
            };
            self.spawn_connection(stream, peer, guard);
        }

        drop(listener);
        tracing::info!(address = %self.local_addr, "Listener closed");
        Ok(())
    }

    async fn begin_graceful_stop(&self, ctx: &Context) -> Result<(), StopError> {
        if self.tracker.close() {
            tracing::info!(
                active_connections = self.tracker.active_count(),
                "Stopped accepting, draining connections"
            );
        }
        self.stopping.cancel();

        tokio::select! {
            biased;
            _ = self.tracker.wait_idle() => {
                tracing::info!("All connections drained");
                Ok(())
            }
            err = ctx.done() => {
                let remaining = self.tracker.active_count();
                self.force_close.cancel();
                let _ = tokio::time::timeout(FORCE_CLOSE_GRACE, self.tracker.wait_idle()).await;

                match err {
                    ContextError::DeadlineExceeded => Err(StopError::DeadlineExceeded { remaining }),
                    ContextError::Canceled(cause) => Err(StopError::Canceled(cause)),
                }
            }
        }
    }
}

/// Errors from `accept` that concern a single connection, not the listener.
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Process or system limits hit while accepting; these clear as connections close.
fn is_resource_exhaustion(err: &io::Error) -> bool {
    // ENFILE and EMFILE share these values on Linux and the BSDs.
    #[cfg(unix)]
    const FD_LIMIT_ERRNOS: [i32; 2] = [23, 24];
    #[cfg(not(unix))]
    const FD_LIMIT_ERRNOS: [i32; 0] = [];

    err.kind() == io::ErrorKind::OutOfMemory
        || err
            .raw_os_error()
            .is_some_and(|code| FD_LIMIT_ERRNOS.contains(&code))
}
