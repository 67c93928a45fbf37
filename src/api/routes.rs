use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    approve_handler, delete_role_handler, get_role_handler, health_handler, issue_handler,
    list_issues_handler, list_requests_handler, list_roles_handler, open_request_handler,
    put_role_handler, read_config_handler, read_request_handler, renew_lease_handler,
    revoke_lease_handler, role_overview_handler, write_config_handler, ApiState,
};
use crate::backend::ApprovedSecretsBackend;

pub fn build_router(backend: Arc<ApprovedSecretsBackend>) -> Router {
    let state = ApiState { backend };

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/config", put(write_config_handler).get(read_config_handler))
        .route("/v1/roles", get(list_roles_handler))
        .route(
            "/v1/roles/{name}",
            put(put_role_handler).get(get_role_handler).delete(delete_role_handler),
        )
        .route("/v1/soll-ist", get(role_overview_handler))
        .route("/v1/request/{name}", post(open_request_handler))
        .route("/v1/requests/{name}", get(list_requests_handler))
        .route("/v1/requests/{name}/{nonce}", get(read_request_handler))
        .route("/v1/approve/{name}", post(approve_handler))
        .route("/v1/issue/{name}", post(issue_handler))
        .route("/v1/issues/{name}", get(list_issues_handler))
        .route("/v1/leases/revoke", post(revoke_lease_handler))
        .route("/v1/leases/renew", post(renew_lease_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
