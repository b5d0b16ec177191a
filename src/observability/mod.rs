//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, JSON on Cloud Run)
//!     → trace_context.rs (trace IDs from request headers, attached to spans)
//!
//! Consumers:
//!     → Cloud Logging (stdout, JSON) or a terminal (pretty)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID and trace ID flow through every request span
//! - No exporter: traces are correlated through log fields only

pub mod logging;
pub mod trace_context;

pub use logging::init_logging;
pub use trace_context::TraceContext;
