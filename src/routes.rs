use crate::docs::ApiDoc;
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub fn configure_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes(state))
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(crate::modules::bot::handler::health))
        .nest("/webhook", crate::modules::bot::router(state))
}
