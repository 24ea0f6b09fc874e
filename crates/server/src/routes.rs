use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use common::types::Health;
use service::observability;
use service::record::{ServiceKind, ServiceRecord};

use crate::auth::{self, ApiState, AuthedService};
use crate::errors::ApiError;

/// Public view of one registered service.
#[derive(Debug, Serialize)]
pub struct ServiceModel {
    pub name: String,
    pub kind: ServiceKind,
    pub admin: bool,
    pub url: String,
    pub prefix: String,
    pub command: Vec<String>,
    pub display: bool,
    pub info: serde_json::Map<String, serde_json::Value>,
}

impl From<&ServiceRecord> for ServiceModel {
    fn from(rec: &ServiceRecord) -> Self {
        Self {
            name: rec.name().to_string(),
            kind: rec.kind(),
            admin: rec.spec.admin,
            url: rec.url.clone().unwrap_or_default(),
            prefix: rec.endpoint.as_ref().map(|e| e.base_url.clone()).unwrap_or_default(),
            command: rec.spec.command.clone(),
            display: rec.spec.display,
            info: rec.spec.info.clone(),
        }
    }
}

pub async fn health(State(state): State<ApiState>) -> Json<Health> {
    Json(Health::ok(state.registry.load().len()))
}

async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_services(State(state): State<ApiState>) -> Json<Vec<ServiceModel>> {
    let registry = state.registry.load();
    Json(registry.iter().map(|rec| ServiceModel::from(rec.as_ref())).collect())
}

async fn get_service(State(state): State<ApiState>, Path(name): Path<String>) -> Result<Json<ServiceModel>, ApiError> {
    let registry = state.registry.load();
    let rec = registry.get(&name).ok_or_else(|| ApiError::NotFound(format!("service {name}")))?;
    Ok(Json(ServiceModel::from(rec.as_ref())))
}

/// Identify the owner of another token.
async fn token_owner(
    State(state): State<ApiState>,
    Extension(caller): Extension<AuthedService>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner = auth::resolve_token(&state, &token)
        .await?
        .ok_or_else(|| ApiError::NotFound("token".into()))?;
    tracing::debug!(caller = %caller.0, owner = %owner, "token identified");
    Ok(Json(serde_json::json!({ "kind": "service", "name": owner })))
}

async fn whoami(Extension(caller): Extension<AuthedService>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "kind": "service", "name": caller.0 }))
}

async fn metrics() -> impl IntoResponse {
    match observability::encode_metrics() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics encode error: {e}")).into_response(),
    }
}

/// Build the hub API router, mounted under `<base_url>hub/`.
pub fn build_router(state: ApiState, base_url: &str) -> Router {
    let public = Router::new()
        .route("/hub/health", get(health))
        .route("/hub/api", get(api_info))
        .route("/hub/metrics", get(metrics));

    let api = Router::new()
        .route("/hub/api/services", get(list_services))
        .route("/hub/api/services/:name", get(get_service))
        .route("/hub/api/authorizations/token/:token", get(token_owner))
        .route("/hub/api/user", get(whoami))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_token));

    let hub = public.merge(api).with_state(state);
    let base = base_url.trim_end_matches('/');
    let app = if base.is_empty() { hub } else { Router::new().nest(base, hub) };

    app.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
            .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
    )
}
