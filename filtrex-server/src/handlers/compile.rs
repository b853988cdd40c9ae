//! Compile endpoints: synchronous, streaming (SSE), batch, and queued.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use filtrex_core::{ChannelEventSink, RequestOutcome};
use filtrex_core::workflow::runs::{BatchWorkflow, CompilationWorkflow};
use filtrex_model::api::{
    BatchCompileRequest, BatchCompileResponse, CompileRequest, CompileResponse,
    QueueResultResponse, QueueStatus, QueuedCompileAck,
};
use filtrex_model::events::CompileEvent;
use filtrex_model::workflow::WorkflowKind;

use crate::errors::{AppError, AppResult};
use crate::routes::paths;
use crate::state::AppState;

const CACHE_HEADER: &str = "X-Cache";
const DEDUP_HEADER: &str = "X-Request-Deduplication";

/// How long queued results stay retrievable.
const QUEUE_RESULT_TTL: Duration = Duration::from_secs(3600);

fn queue_key(request_id: Uuid) -> String {
    format!("queue/results/{request_id}")
}

/// `POST /api/v1/compile`
pub async fn compile_handler(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> AppResult<Response> {
    let started = Instant::now();
    let outcome = match state.service.compile(&request).await {
        Ok(outcome) => outcome,
        Err(err) => {
            state
                .metrics
                .record("compile", RequestOutcome::Error, started.elapsed());
            return Err(AppError::from(err));
        }
    };

    let bucket = if outcome.cache_hit {
        RequestOutcome::CacheHit
    } else if outcome.coalesced {
        RequestOutcome::Coalesced
    } else {
        RequestOutcome::Success
    };
    state.metrics.record("compile", bucket, started.elapsed());

    let mut response = Json(outcome.response).into_response();
    let cache_value = if outcome.cache_hit { "HIT" } else { "MISS" };
    response
        .headers_mut()
        .insert(CACHE_HEADER, HeaderValue::from_static(cache_value));
    if outcome.coalesced {
        response
            .headers_mut()
            .insert(DEDUP_HEADER, HeaderValue::from_static("HIT"));
    }
    Ok(response)
}

/// `POST /api/v1/compile/stream`
///
/// Frames each pipeline event as `event: <name>` / `data: <json>` and ends
/// the stream with `result` + `done`, or a terminal `error`.
pub async fn compile_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (sink, mut rx) = ChannelEventSink::new();
    let cancel = CancellationToken::new();
    let service = state.service.clone();
    let metrics = state.metrics.clone();

    let task = tokio::spawn(async move {
        let started = Instant::now();
        let result = service.compile_streaming(&request, &sink, &cancel).await;
        let bucket = if result.is_ok() {
            RequestOutcome::Success
        } else {
            RequestOutcome::Error
        };
        metrics.record("compile:stream", bucket, started.elapsed());
        result
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<Event, Infallible>(frame(&event));
        }
        // The sink is dropped once the compile task finishes.
        match task.await {
            Ok(Ok(response)) => {
                yield Ok(frame(&CompileEvent::Result(response)));
                yield Ok(frame(&CompileEvent::Done {}));
            }
            Ok(Err(err)) => {
                yield Ok(frame(&CompileEvent::Error {
                    message: err.to_string(),
                }));
            }
            Err(join_err) => {
                error!(error = %join_err, "streaming compile task panicked");
                yield Ok(frame(&CompileEvent::Error {
                    message: "internal error".to_string(),
                }));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn frame(event: &CompileEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.data().to_string())
}

/// `POST /api/v1/compile/batch`
pub async fn compile_batch_handler(
    State(state): State<AppState>,
    Json(request): Json<BatchCompileRequest>,
) -> AppResult<Json<BatchCompileResponse>> {
    let started = Instant::now();
    BatchWorkflow::validate_batch(&request.requests)
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let workflow = BatchWorkflow::new(
        state.workflows.clone(),
        state.pipeline.clone(),
        state.result_cache.clone(),
    );
    let instance = state
        .workflows
        .create(
            WorkflowKind::Batch,
            serde_json::json!({ "items": request.requests.len() }),
        )
        .await?;

    let response = workflow
        .execute(instance, &request.requests, CancellationToken::new())
        .await?;
    state
        .metrics
        .record("compile:batch", RequestOutcome::Success, started.elapsed());
    Ok(Json(response))
}

/// `POST /api/v1/queue/compile` — accepts the job and returns `202` with
/// the polling location.
pub async fn queue_compile_handler(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> AppResult<(StatusCode, Json<QueuedCompileAck>)> {
    request
        .configuration
        .validate()
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let request_id = Uuid::new_v4();
    state
        .kv
        .put_json(
            &queue_key(request_id),
            &QueueResultResponse {
                request_id,
                status: QueueStatus::Pending,
                result: None,
            },
            Some(QUEUE_RESULT_TTL),
        )
        .await?;

    let instance = state
        .workflows
        .create(
            WorkflowKind::Compilation,
            serde_json::json!({ "requestId": request_id }),
        )
        .await?;
    state.analytics.record(
        "queue:accepted",
        serde_json::json!({ "requestId": request_id, "instanceId": instance.instance_id }),
    );

    let workflow = CompilationWorkflow::new(
        state.workflows.clone(),
        state.pipeline.clone(),
        state.result_cache.clone(),
        state.metrics.clone(),
    );
    let kv = state.kv.clone();
    tokio::spawn(async move {
        let outcome = workflow
            .execute(instance, &request, CancellationToken::new())
            .await;
        let stored = match outcome {
            Ok(response) => QueueResultResponse {
                request_id,
                status: QueueStatus::Complete,
                result: Some(response),
            },
            Err(err) => QueueResultResponse {
                request_id,
                status: QueueStatus::Failed,
                result: Some(CompileResponse::failure(err.to_string())),
            },
        };
        if let Err(err) = kv
            .put_json(&queue_key(request_id), &stored, Some(QUEUE_RESULT_TTL))
            .await
        {
            error!(%request_id, error = %err, "failed to store queued compile result");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedCompileAck {
            request_id,
            status_url: format!("{}/{request_id}", paths::v1::QUEUE_RESULTS),
        }),
    ))
}

/// `GET /api/v1/queue/results/{request_id}`
pub async fn queue_result_handler(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<QueueResultResponse>> {
    match state
        .kv
        .get_json::<QueueResultResponse>(&queue_key(request_id))
        .await?
    {
        Some(stored) => Ok(Json(stored)),
        None => Err(AppError::not_found(format!(
            "no queued result for {request_id}"
        ))),
    }
}
