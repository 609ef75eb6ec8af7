use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct InfoResponse {
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Whether a storage credential is currently cached
    pub credential_cached: bool,
    pub storage_backend: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service banner", body = InfoResponse)
    ),
    tag = "system"
)]
pub async fn root() -> impl IntoResponse {
    Json(InfoResponse {
        message: "API de radicación de formularios en funcionamiento".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let credential_cached = match &state.broker {
        Some(broker) => broker.current().await.is_some(),
        None => true,
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        credential_cached,
        storage_backend: format!("{:?}", state.config.storage_backend).to_lowercase(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
