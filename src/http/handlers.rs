//! Demo handlers.

use axum::extract::State;
use axum::response::Html;
use axum::Extension;

use crate::http::response::HandlerError;
use crate::http::server::AppState;
use crate::lifecycle::Context;

pub async fn hello() -> Html<&'static str> {
    Html("<h1>hello world!</h1>")
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// Calls the slow upstream with the request context, so shutdown aborts it.
pub async fn cancelable_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<Context>,
) -> Result<Html<&'static str>, HandlerError> {
    tracing::info!(delay_secs = state.delay_secs, "Starting work");
    state.upstream.delay(&ctx, state.delay_secs).await?;
    Ok(Html("<h1>hello world</h1>"))
}

/// Same call on a fresh background context.
///
/// Ignores the request context, so root cancellation cannot interrupt it;
/// during shutdown the listener has to force the connection closed.
pub async fn noncancelable_request(
    State(state): State<AppState>,
) -> Result<Html<&'static str>, HandlerError> {
    tracing::info!(delay_secs = state.delay_secs, "Starting unscoped work");
    let ctx = Context::background();
    state.upstream.delay(&ctx, state.delay_secs).await?;
    Ok(Html("<h1>hello world</h1>"))
}
