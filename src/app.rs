use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Updates are small JSON documents; media never passes through the webhook.
const MAX_UPDATE_BYTES: usize = 1024 * 1024;

pub fn create_app(state: AppState) -> Router {
    crate::routes::configure_routes(state.clone())
        .layer(RequestBodyLimitLayer::new(MAX_UPDATE_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
