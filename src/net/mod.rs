//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, admission)
//!     → connection.rs (lifecycle tracking)
//!     → Hand off to HTTP layer with a request context
//!
//! Listener States:
//!     Bound → Accepting → Stopping → Drained | Force-closed
//! ```
//!
//! # Design Decisions
//! - Admission and the active count share one watch channel, so no
//!   connection is admitted after stop begins
//! - Each connection tracked for graceful shutdown
//! - Connections still open at the deadline are dropped

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{HttpListener, ListenerError, ServiceListener, StopError};
