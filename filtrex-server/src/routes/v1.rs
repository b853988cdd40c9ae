use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{
        compile::{
            compile_batch_handler, compile_handler, compile_stream_handler,
            queue_compile_handler, queue_result_handler,
        },
        health::{health_handler, sources_health_handler},
        metrics::metrics_handler,
    },
    middleware::rate_limit::rate_limit,
    routes::paths::v1,
    state::AppState,
    websocket::websocket_handler,
};

/// Create all v1 API routes.
pub fn create_router(state: AppState) -> Router {
    // Compile endpoints sit behind the per-client rate limiter.
    let compile_routes = Router::new()
        .route(v1::COMPILE, post(compile_handler))
        .route(v1::COMPILE_STREAM, post(compile_stream_handler))
        .route(v1::COMPILE_BATCH, post(compile_batch_handler))
        .route(v1::QUEUE_COMPILE, post(queue_compile_handler))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .merge(compile_routes)
        .route(v1::QUEUE_RESULT, get(queue_result_handler))
        .route(v1::HEALTH, get(health_handler))
        .route(v1::METRICS, get(metrics_handler))
        .route(v1::SOURCES_HEALTH, get(sources_health_handler))
        .route(v1::WEBSOCKET, get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
