use crate::common::response::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use constant_time_eq::constant_time_eq;
use tracing::warn;

pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// Only the messaging service knows the webhook secret.
pub async fn webhook_secret_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = req
        .headers()
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(secret) if constant_time_eq(secret.as_bytes(), state.config.webhook_secret.as_bytes()) => {
            Ok(next.run(req).await)
        }
        Some(_) => {
            warn!("Webhook call with a wrong secret token");
            Err(ApiError(
                "Unauthorized: invalid secret token".to_string(),
                StatusCode::UNAUTHORIZED,
            ))
        }
        None => Err(ApiError(
            "Unauthorized: missing secret token".to_string(),
            StatusCode::UNAUTHORIZED,
        )),
    }
}
