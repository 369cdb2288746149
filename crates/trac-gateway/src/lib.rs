// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP surface of the protocol gateway: a health endpoint exempt from
//! auth, and a thin REST façade over the metadata store kernel, gated by
//! [`trac_authgate::AuthGate`]. The gRPC/gRPC-Web/WebSocket translation
//! paths (§4.8) are exercised through `trac-protocol` directly by whichever
//! transport layer is wired in front of this router in a full deployment;
//! this crate owns the parts that are naturally HTTP-shaped.

pub mod middleware;

use axum::{
    extract::{Path as AxPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use trac_authgate::{AuthGate, Identity};
use trac_core::TenantCode;
use trac_error::TracError;
use trac_metastore::MetadataKernel;

/// Shared state reachable from every handler.
#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<MetadataKernel>,
    pub auth: Arc<AuthGate>,
}

/// Wraps a [`TracError`] for Axum's `IntoResponse`, using the error
/// taxonomy's own HTTP status mapping rather than reinventing one here.
#[derive(Debug)]
pub struct ApiError(TracError);

impl From<TracError> for ApiError {
    fn from(err: TracError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.code.http_status();
        let body = Json(json!({
            "code": self.0.code.code(),
            "message": self.0.message,
            "context": self.0.context,
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenantRequest {
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub tenant_code: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub tenant_code: String,
    pub description: String,
}

/// Assemble the gateway's HTTP router. `/health` is exempt from auth per
/// [`trac_authgate::EXEMPT_ROUTES`]; every other route runs behind
/// [`middleware::auth_middleware`].
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/tenants", get(list_tenants).post(create_tenant))
        .route("/v1/tenants/{tenant_code}", put(update_tenant))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::auth_middleware))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn list_tenants(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TenantResponse>>, ApiError> {
    let tenants = state.kernel.list_tenants().await?;
    Ok(Json(
        tenants
            .into_iter()
            .map(|t| TenantResponse { tenant_code: t.tenant_code.to_string(), description: t.description })
            .collect(),
    ))
}

async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<Json<TenantResponse>, ApiError> {
    let tenant_code = TenantCode::new(req.tenant_code)?;
    state.kernel.create_tenant(&tenant_code, &req.description).await?;
    Ok(Json(TenantResponse { tenant_code: tenant_code.to_string(), description: req.description }))
}

async fn update_tenant(
    AxPath(tenant_code): AxPath<String>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateTenantRequest>,
) -> Result<StatusCode, ApiError> {
    let tenant_code = TenantCode::new(tenant_code)?;
    state.kernel.update_tenant(&tenant_code, &req.description).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Extract and strip `Bearer ` from an `authorization` header, for handing
/// to [`AuthGate::authenticate`].
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Identity attached to the request by [`middleware::auth_middleware`],
/// retrievable by downstream handlers via an Axum extension.
#[derive(Clone)]
pub struct RequestIdentity(pub Identity);

pub fn log_request_identity(identity: &Identity) {
    info!(user = %identity.user, tenant = %identity.tenant, "authenticated request");
}
