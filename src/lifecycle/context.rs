//! Cancellable context tree.
//!
//! # Responsibilities
//! - Root context with a single cancel trigger, owned by the shutdown coordinator
//! - Per-request contexts derived from the root, optionally with a deadline
//! - Fresh background contexts for deadlines that must not inherit root cancellation
//! - Racing downstream work against cancellation
//!
//! # Design Decisions
//! - Built on `tokio_util::sync::CancellationToken` child tokens: cancelling a
//!   parent cancels every descendant, and a dropped child unregisters itself
//! - Deadlines are stored as absolute instants, inherited as the minimum over
//!   ancestors, and checked lazily (no timer task per context)
//! - The first recorded cause wins; later cancels are no-ops

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::signals::TerminationSignal;

/// Why a context was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// A termination signal started the shutdown sequence.
    Shutdown(TerminationSignal),
    /// The server is going away for a reason other than a signal.
    ServerStopped,
    /// The request this context was scoped to has completed or its connection dropped.
    RequestFinished,
    /// Cancelled explicitly without a more specific cause.
    Requested,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Shutdown(signal) => write!(f, "shutdown ({signal})"),
            CancelCause::ServerStopped => write!(f, "server stopped"),
            CancelCause::RequestFinished => write!(f, "request finished"),
            CancelCause::Requested => write!(f, "cancel requested"),
        }
    }
}

/// Error reported by a context that is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled: {0}")]
    Canceled(CancelCause),

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Node {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: OnceLock<CancelCause>,
    parent: Option<Arc<Node>>,
}

impl Node {
    fn root() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            cause: OnceLock::new(),
            parent: None,
        }
    }
}

/// A node in the cancellation tree.
///
/// Cheap to clone; clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Context {
    /// A fresh context that is never cancelled and has no deadline.
    ///
    /// Use this for work that must survive root cancellation, such as the
    /// drain deadline itself.
    pub fn background() -> Self {
        Self {
            node: Arc::new(Node::root()),
        }
    }

    fn derive(&self, timeout: Option<Duration>) -> Arc<Node> {
        // A deadline past the end of `Instant`'s range is no deadline.
        let own = timeout.and_then(|d| Instant::now().checked_add(d));
        let deadline = match (self.node.deadline, own) {
            (Some(inherited), Some(own)) => Some(inherited.min(own)),
            (inherited, own) => inherited.or(own),
        };

        Arc::new(Node {
            token: self.node.token.child_token(),
            deadline,
            cause: OnceLock::new(),
            parent: Some(Arc::clone(&self.node)),
        })
    }

    /// A child that is cancelled only through this context.
    pub fn child(&self) -> Context {
        Context {
            node: self.derive(None),
        }
    }

    /// A child whose deadline is `timeout` from now (or the inherited one, if earlier).
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        Context {
            node: self.derive(Some(timeout)),
        }
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.node.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// `None` while the context is live.
    pub fn err(&self) -> Option<ContextError> {
        if self.node.token.is_cancelled() {
            return Some(ContextError::Canceled(self.cause()));
        }
        match self.node.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.node.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.node.token.cancelled() => ContextError::Canceled(self.cause()),
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.node.token.cancelled().await;
                ContextError::Canceled(self.cause())
            }
        }
    }

    /// Run `fut` until it completes or this context ends, whichever comes first.
    ///
    /// On cancellation `fut` is dropped, which aborts any I/O it owns.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }

    // Nearest recorded cause walking towards the root.
    fn cause(&self) -> CancelCause {
        let mut node = Some(&self.node);
        while let Some(n) = node {
            if n.token.is_cancelled() {
                if let Some(cause) = n.cause.get() {
                    return *cause;
                }
            }
            node = n.parent.as_ref();
        }
        CancelCause::Requested
    }
}

/// The unique trigger for one context.
///
/// Not `Clone`: whoever holds the handle owns the right to cancel.
#[derive(Debug)]
pub struct CancelHandle {
    node: Arc<Node>,
}

impl CancelHandle {
    /// Cancel the context and all of its descendants.
    ///
    /// Idempotent. Only the first call records its cause; a context already
    /// cancelled through an ancestor keeps the ancestor's cause.
    pub fn cancel(&self, cause: CancelCause) {
        if !self.node.token.is_cancelled() {
            let _ = self.node.cause.set(cause);
        }
        self.node.token.cancel();
    }

    /// Cancel with `cause` when the returned guard is dropped.
    pub fn drop_guard(self, cause: CancelCause) -> CancelOnDrop {
        CancelOnDrop {
            handle: self,
            cause,
        }
    }
}

/// Cancels its context when dropped, on every exit path.
#[derive(Debug)]
pub struct CancelOnDrop {
    handle: CancelHandle,
    cause: CancelCause,
}

impl CancelOnDrop {
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.handle.cancel(self.cause);
    }
}

/// Create the process root context and its cancel trigger.
pub fn new_root() -> (Context, CancelHandle) {
    let node = Arc::new(Node::root());
    (
        Context {
            node: Arc::clone(&node),
        },
        CancelHandle { node },
    )
}

/// Derive the context for one inbound request.
///
/// The result is cancelled by root cancellation, by `timeout` if given, or by
/// the returned handle, whichever happens first.
pub fn derive_request_context(root: &Context, timeout: Option<Duration>) -> (Context, CancelHandle) {
    let node = root.derive(timeout);
    (
        Context {
            node: Arc::clone(&node),
        },
        CancelHandle { node },
    )
}
