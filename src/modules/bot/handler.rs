use super::dto::{HealthResponse, WebhookAck};
use super::model::InboundUpdate;
use super::service::BotService;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::infrastructure::telegram::types::Update;
use crate::pipeline::bridge::IngestError;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{info, warn};

/// Receive a Bot API update
#[utoipa::path(
    post,
    path = "/api/v1/webhook",
    request_body(content = String, description = "Bot API `Update` object", content_type = "application/json"),
    responses(
        (status = 200, description = "Update consumed", body = ApiResponse<WebhookAck>),
        (status = 401, description = "Missing or wrong secret token"),
        (status = 503, description = "Pipeline busy or stopped, retry later")
    ),
    tag = "Webhook",
    security(("webhook_secret" = []))
)]
pub async fn webhook(State(state): State<AppState>, Json(update): Json<Update>) -> impl IntoResponse {
    match InboundUpdate::classify(update) {
        InboundUpdate::Asset(request) => {
            let (chat_id, message_id) = (request.chat_id, request.message_id);
            match state.bridge.submit(request) {
                Ok(ack) => {
                    info!(job_id = %ack.job_id, ready = ack.pipeline_ready, "📦 Video accepted");
                    if !ack.pipeline_ready {
                        let state = state.clone();
                        tokio::spawn(async move {
                            BotService::reply(
                                &state,
                                chat_id,
                                message_id,
                                "⏳ Queued. The encoder is starting up.",
                            )
                            .await;
                        });
                    }
                    ApiSuccess(
                        ApiResponse::success(WebhookAck::job(&ack), "Job accepted"),
                        StatusCode::OK,
                    )
                    .into_response()
                }
                Err(IngestError::Unauthorized(user)) => {
                    warn!(user, "Rejected video from unauthorized user");
                    tokio::spawn(async move {
                        BotService::deny(&state, chat_id, message_id).await;
                    });
                    ApiSuccess(
                        ApiResponse::success(WebhookAck::consumed(false), "Access denied"),
                        StatusCode::OK,
                    )
                    .into_response()
                }
                Err(e) => {
                    warn!("Video not accepted: {}", e);
                    ApiError::from(e).into_response()
                }
            }
        }
        InboundUpdate::Interaction(update) => {
            tokio::spawn(BotService::handle(state, update));
            ApiSuccess(
                ApiResponse::success(WebhookAck::consumed(true), "Update dispatched"),
                StatusCode::OK,
            )
            .into_response()
        }
        InboundUpdate::Ignored => ApiSuccess(
            ApiResponse::success(WebhookAck::consumed(false), "Update ignored"),
            StatusCode::OK,
        )
        .into_response(),
    }
}

/// Service health
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        pipeline_ready: state.bridge.is_ready(),
        redis: state.redis.ping().await,
        jobs: state.jobs.counts(),
    })
}
