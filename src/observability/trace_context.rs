//! Trace context extraction from incoming requests.
//!
//! Cloud Run's front end sets `X-Cloud-Trace-Context: TRACE_ID/SPAN_ID;o=TRACE_TRUE`;
//! other callers may send a W3C `traceparent`. Either is attached to the
//! request span so log lines can be correlated with a trace.

use axum::http::HeaderMap;

pub const CLOUD_TRACE_HEADER: &str = "x-cloud-trace-context";
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Trace identifiers carried by a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceContext {
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub sampled: bool,
}

fn split_hex(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !matches!(c, '0'..='9' | 'a'..='f'))
        .unwrap_or(s.len());
    s.split_at(end)
}

impl TraceContext {
    /// Parse an `X-Cloud-Trace-Context` value.
    ///
    /// Lenient: every part is optional, parsing stops at the first unexpected
    /// character, and a span ID of `0` means "no span".
    pub fn parse_cloud_trace(value: &str) -> Self {
        let (trace_id, rest) = split_hex(value);

        let (span_id, rest) = match rest.strip_prefix('/') {
            Some(after) => match split_hex(after) {
                ("", _) => ("", rest),
                (span, rest) => (span, rest),
            },
            None => ("", rest),
        };

        let sampled = rest
            .strip_prefix(";o=")
            .and_then(|flag| flag.chars().next())
            .map(|flag| flag == '1')
            .unwrap_or(false);

        Self {
            trace_id: (!trace_id.is_empty()).then(|| trace_id.to_string()),
            span_id: (!span_id.is_empty() && span_id != "0").then(|| span_id.to_string()),
            sampled,
        }
    }

    /// Parse a W3C `traceparent` value (`00-<trace>-<parent>-<flags>`).
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        let is_hex = |s: &str, len: usize| s.len() == len && split_hex(s).1.is_empty();
        if !is_hex(version, 2) || version == "ff" {
            return None;
        }
        if !is_hex(trace_id, 32) || trace_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if !is_hex(span_id, 16) || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        if !is_hex(flags, 2) {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: Some(trace_id.to_string()),
            span_id: Some(span_id.to_string()),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// Cloud trace header first, then `traceparent`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let cloud = headers
            .get(CLOUD_TRACE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Self::parse_cloud_trace)
            .filter(|ctx| ctx.trace_id.is_some());

        cloud.or_else(|| {
            headers
                .get(TRACEPARENT_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_traceparent)
        })
    }

    /// Trace name in the `projects/{project}/traces/{trace}` form Cloud Logging links on.
    pub fn qualified_trace(&self, project_id: Option<&str>) -> Option<String> {
        let trace_id = self.trace_id.as_deref()?;
        Some(match project_id {
            Some(project) => format!("projects/{project}/traces/{trace_id}"),
            None => trace_id.to_string(),
        })
    }
}
