//! Request identification and span construction.
//!
//! # Responsibilities
//! - Assign a request ID (UUID v4) unless the caller sent one
//! - Build the per-request tracing span with request and trace identifiers
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Trace IDs come from `X-Cloud-Trace-Context` or `traceparent`
//! - Recorded as `trace`, `span_id`, `trace_sampled`; the JSON log layer
//!   renames them to Cloud Logging's keys

use std::sync::Arc;

use axum::http::{HeaderName, Request};
use tower_http::trace::MakeSpan;
use tracing::Span;

use crate::observability::TraceContext;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Builds the span every request's log lines are recorded under.
#[derive(Debug, Clone, Default)]
pub struct RequestSpan {
    project_id: Option<Arc<str>>,
}

impl RequestSpan {
    pub fn new(project_id: Option<&str>) -> Self {
        Self {
            project_id: project_id.map(Arc::from),
        }
    }
}

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");

        let span = tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
            trace = tracing::field::Empty,
            span_id = tracing::field::Empty,
            trace_sampled = tracing::field::Empty,
        );

        if let Some(trace) = TraceContext::from_headers(request.headers()) {
            if let Some(name) = trace.qualified_trace(self.project_id.as_deref()) {
                span.record("trace", name.as_str());
            }
            if let Some(span_id) = trace.span_id.as_deref() {
                span.record("span_id", span_id);
            }
            span.record("trace_sampled", trace.sampled);
        }

        span
    }
}
