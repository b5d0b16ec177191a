//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Root context → Upstream client → Router → Bind listener
//!
//! Run (shutdown.rs):
//!     Accept loop ║ wait for signal
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Cancel root → Stop accepting → Drain (bounded) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Request contexts derive from one root (context.rs); cancelling the root
//!   reaches every in-flight handler
//! - The root is cancelled before the listener stops
//! - Shutdown has timeout: connections are force-closed after the deadline

pub mod context;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use context::{derive_request_context, new_root, CancelCause, CancelHandle, Context, ContextError};
pub use shutdown::{Coordinator, DrainOutcome, ShutdownError, ShutdownState};
pub use signals::{
    watch_for_termination, OsSignalWatcher, SignalTrigger, SignalWatcher, SyntheticSignal,
    TerminationSignal,
};
pub use startup::{Service, StartupError};
