//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! net::listener (hyper connection, request context in extensions)
//!     → request.rs (request ID, span with trace IDs)
//!     → handlers.rs (demo routes; upstream calls take the request context)
//!     → response.rs (error bodies)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestSpan, X_REQUEST_ID};
pub use server::{build_router, AppState};
