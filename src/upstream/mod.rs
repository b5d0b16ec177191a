//! Upstream (downstream-call) subsystem.
//!
//! Every call takes the caller's [`Context`](crate::lifecycle::Context);
//! handlers pass their request context so root cancellation interrupts
//! outstanding upstream work.

pub mod client;

pub use client::{UpstreamClient, UpstreamError};
