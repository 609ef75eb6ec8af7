pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::credentials::CredentialBroker;
use crate::services::orchestrator::SubmissionOrchestrator;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::submissions::submit_form,
        api::handlers::health::root,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::submissions::SubmissionResponse,
            api::handlers::health::InfoResponse,
            api::handlers::health::HealthResponse,
            services::orchestrator::FileReport,
            models::SubmissionForm,
        )
    ),
    tags(
        (name = "submissions", description = "Form submission endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SubmissionOrchestrator>,
    /// Present when the storage backend authenticates through a broker
    pub broker: Option<Arc<CredentialBroker>>,
    pub config: AppConfig,
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(api::handlers::health::root))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/api/upload",
            post(api::handlers::submissions::submit_form).layer(
                axum::extract::DefaultBodyLimit::max(state.config.max_body_size),
            ),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors)
        .with_state(state)
}
