//! Cloud Run service with coordinated graceful shutdown.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod upstream;

pub use config::schema::ServiceConfig;
pub use lifecycle::{Context, DrainOutcome, Service};
