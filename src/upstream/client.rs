//! Context-aware HTTP client for upstream calls.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::UpstreamConfig;
use crate::lifecycle::context::{Context, ContextError};

/// Errors from an upstream call. Handled by the calling handler.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned {0}")]
    Status(reqwest::StatusCode),

    #[error("upstream call abandoned: {0}")]
    Context(#[from] ContextError),
}

impl UpstreamError {
    /// True when the call was cut short by its context rather than failing on its own.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpstreamError::Context(_))
    }
}

/// HTTP client bound to one upstream base URL.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, timeout: Duration) -> Result<Self, UpstreamError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            http: builder.build()?,
            base_url: Url::parse(&config.base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET `path` (relative to the base URL) and decode a JSON body.
    ///
    /// The call is raced against `ctx`: if the context is cancelled or its
    /// deadline passes first, the in-flight request is dropped and
    /// `UpstreamError::Context` is returned.
    pub async fn get_json(&self, ctx: &Context, path: &str) -> Result<Value, UpstreamError> {
        let url = self.base_url.join(path)?;
        tracing::debug!(%url, "Calling upstream");

        ctx.run(async {
            let response = self.http.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(UpstreamError::Status(status));
            }
            Ok(response.json::<Value>().await?)
        })
        .await?
    }

    /// Ask the upstream to wait `secs` before responding.
    pub async fn delay(&self, ctx: &Context, secs: u64) -> Result<Value, UpstreamError> {
        self.get_json(ctx, &format!("delay/{secs}")).await
    }
}
