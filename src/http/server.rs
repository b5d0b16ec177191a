//! Router construction.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, request span)
//! - Hold the state handlers share

use axum::routing::get;
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::http::handlers;
use crate::http::request::{RequestSpan, X_REQUEST_ID};
use crate::upstream::{UpstreamClient, UpstreamError};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub delay_secs: u64,
}

impl AppState {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            upstream: UpstreamClient::new(&config.upstream, config.timeouts.upstream())?,
            delay_secs: config.upstream.delay_secs,
        })
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState, project_id: Option<&str>) -> Router {
    Router::new()
        .route("/", get(handlers::hello))
        .route("/healthz", get(handlers::healthz))
        .route("/cancelablerequest", get(handlers::cancelable_request))
        .route("/noncancelablerequest", get(handlers::noncancelable_request))
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http().make_span_with(RequestSpan::new(project_id)))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
}
