//! Per-client fixed-window rate limiting for the compile endpoints.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use filtrex_core::RequestOutcome;

use crate::errors::AppError;
use crate::state::AppState;

/// Client identity: the first `X-Forwarded-For` hop when present,
/// otherwise the peer address.
fn client_id(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_id(&request);
    let decision = state.limiter.check(&client).await;

    if !decision.allowed {
        let retry_after = decision.retry_after_secs.unwrap_or(1);
        debug!(client, retry_after, "rate limit exceeded");
        state.metrics.record(
            "rate-limit",
            RequestOutcome::RateLimited,
            Duration::ZERO,
        );
        return Err(AppError::rate_limited(
            format!(
                "rate limit of {} requests per {}s exceeded",
                decision.limit,
                state.settings.rate_limit.window_secs
            ),
            retry_after,
        ));
    }

    Ok(next.run(request).await)
}
