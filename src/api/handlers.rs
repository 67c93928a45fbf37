//! HTTP handlers. Each one is a thin shim over the backend services.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::caller::Caller;
use super::error::ApiError;
use crate::backend::ApprovedSecretsBackend;
use crate::domain::{ConfigInput, ConfigView, RequestView, Role, RoleInput};
use crate::services::{IssueParams, IssuedSecret, LeaseHandle, OpenedRequest};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct ApiState {
    pub backend: Arc<ApprovedSecretsBackend>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeysResponse {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleResponse {
    pub name: String,
    #[serde(flatten)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OverviewQuery {
    pub bound_requester_role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub nonce: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueBody {
    pub nonce: String,
    #[serde(flatten)]
    pub params: IssueParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
}

pub async fn write_config_handler(
    State(state): State<ApiState>,
    Json(input): Json<ConfigInput>,
) -> ApiResult<Json<ConfigView>> {
    Ok(Json(state.backend.config.write(input).await?))
}

pub async fn read_config_handler(State(state): State<ApiState>) -> ApiResult<Json<ConfigView>> {
    state
        .backend
        .config
        .read()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("backend is not configured"))
}

pub async fn put_role_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(input): Json<RoleInput>,
) -> ApiResult<Json<RoleResponse>> {
    let (role, warnings) = state.backend.roles.put(&name, input).await?;
    Ok(Json(RoleResponse { name: name.to_lowercase(), role, warnings }))
}

pub async fn get_role_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RoleResponse>> {
    let role = state.backend.roles.get(&name).await?;
    Ok(Json(RoleResponse { name: name.to_lowercase(), role, warnings: Vec::new() }))
}

pub async fn delete_role_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.backend.roles.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_roles_handler(State(state): State<ApiState>) -> ApiResult<Json<KeysResponse>> {
    Ok(Json(KeysResponse { keys: state.backend.roles.list().await? }))
}

pub async fn role_overview_handler(
    State(state): State<ApiState>,
    Query(query): Query<OverviewQuery>,
) -> ApiResult<Json<BTreeMap<String, Role>>> {
    let overview =
        state.backend.roles.overview(query.bound_requester_role.as_deref()).await?;
    Ok(Json(overview))
}

pub async fn open_request_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Caller(caller): Caller,
) -> ApiResult<(StatusCode, Json<OpenedRequest>)> {
    let opened = state.backend.ledger.open(&name, &caller).await?;
    Ok((StatusCode::CREATED, Json(opened)))
}

pub async fn read_request_handler(
    State(state): State<ApiState>,
    Path((name, nonce)): Path<(String, String)>,
) -> ApiResult<Json<RequestView>> {
    Ok(Json(state.backend.ledger.read(&name, &nonce).await?))
}

pub async fn list_requests_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<KeysResponse>> {
    Ok(Json(KeysResponse { keys: state.backend.ledger.list(&name).await? }))
}

pub async fn approve_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Caller(caller): Caller,
    Json(body): Json<ApproveBody>,
) -> ApiResult<Json<RequestView>> {
    let view = state
        .backend
        .approvals
        .approve(&name, &body.nonce, &caller, body.reason.as_deref())
        .await?;
    Ok(Json(view))
}

pub async fn issue_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Caller(caller): Caller,
    Json(body): Json<IssueBody>,
) -> ApiResult<Json<IssuedSecret>> {
    Ok(Json(state.backend.issuance.issue(&name, &body.nonce, &caller, body.params).await?))
}

pub async fn list_issues_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<KeysResponse>> {
    Ok(Json(KeysResponse { keys: state.backend.leases.list_issues(&name).await? }))
}

pub async fn revoke_lease_handler(
    State(state): State<ApiState>,
    Json(lease): Json<LeaseHandle>,
) -> ApiResult<StatusCode> {
    state.backend.leases.revoke(&lease).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn renew_lease_handler(
    State(state): State<ApiState>,
    Json(lease): Json<LeaseHandle>,
) -> ApiResult<StatusCode> {
    state.backend.leases.renew(&lease).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health_handler(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    match state.backend.check_storage().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse { status: "ok".to_string(), storage: "ok".to_string() }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    storage: "unavailable".to_string(),
                }),
            )
        }
    }
}
