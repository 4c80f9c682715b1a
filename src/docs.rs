use crate::modules::bot::dto::{HealthResponse, WebhookAck};
use crate::modules::settings::dto::SettingsResponse;
use crate::middleware::auth::SECRET_HEADER;
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::bot::handler::webhook,
        crate::modules::bot::handler::health,
    ),
    components(
        schemas(
            WebhookAck,
            HealthResponse,
            SettingsResponse,
            crate::pipeline::profile::Quality,
            crate::pipeline::tally::JobCounts,
        )
    ),
    tags(
        (name = "Webhook", description = "Messaging service updates"),
        (name = "Health", description = "Liveness and dependency status")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "webhook_secret",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(SECRET_HEADER))),
            );
        }
    }
}
