//! HTTP surface: routes, caller headers and error mapping.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use approved_secrets::api::build_router;
use common::{Harness, LDAP_ACCESSOR};

struct As<'a> {
    name: &'a str,
    roles: &'a str,
}

const ALICE: As<'static> = As { name: "alice", roles: "dev" };
const BOB: As<'static> = As { name: "bob", roles: "sre" };
const CAROL: As<'static> = As { name: "carol", roles: "sre" };

async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    who: Option<&As<'_>>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(who) = who {
        builder = builder
            .header("x-caller-entity-id", format!("entity-{}", who.name))
            .header("x-caller-entity-name", who.name)
            .header("x-caller-alias", format!("{}={}", LDAP_ACCESSOR, who.name))
            .header("x-caller-role", who.roles);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let h = Harness::unconfigured();
    let router = build_router(h.backend.clone());
    let (status, body) = call(&router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn config_is_redacted_on_read() {
    let h = Harness::unconfigured();
    let router = build_router(h.backend.clone());

    let (status, _) = call(&router, "GET", "/v1/config", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &router,
        "PUT",
        "/v1/config",
        None,
        Some(json!({
            "vault_token": "root-token",
            "approval_ttl": 600,
            "slack_webhook_url": "https://hooks.slack.test/services/secret",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vault_token"], "<sensitive>");

    let (status, body) = call(&router, "GET", "/v1/config", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["approval_ttl"], 600);
    assert_eq!(body["vault_token"], "<sensitive>");
    assert_eq!(body["slack_webhook_url"], "<sensitive>");
    assert!(!body.to_string().contains("root-token"));
}

#[tokio::test]
async fn role_crud_and_overview() {
    let h = Harness::new().await;
    let router = build_router(h.backend.clone());

    let (status, body) = call(
        &router,
        "PUT",
        "/v1/roles/k8s-admin",
        None,
        Some(json!({
            "secret_path": "secret/data/k8s",
            "min_approvers": 2,
            "bound_requester_roles": ["dev"],
            "secret_max_ttl": "400d",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "k8s-admin");
    assert_eq!(body["warnings"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        &router,
        "PUT",
        "/v1/roles/bad",
        None,
        Some(json!({"secret_path": "p", "secret_path_method": "GET", "secret_data": {"a": "b"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (_, body) = call(&router, "GET", "/v1/roles", None, None).await;
    assert_eq!(body["keys"], json!(["k8s-admin"]));

    let (_, body) = call(&router, "GET", "/v1/soll-ist?bound_requester_role=dev", None, None).await;
    assert!(body.get("k8s-admin").is_some());
    let (_, body) = call(&router, "GET", "/v1/soll-ist?bound_requester_role=ops", None, None).await;
    assert_eq!(body, json!({}));

    let (status, _) = call(&router, "DELETE", "/v1/roles/k8s-admin", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = call(&router, "GET", "/v1/roles/k8s-admin", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn full_workflow_over_http() {
    let h = Harness::new().await;
    h.k8s_admin_role().await;
    let router = build_router(h.backend.clone());

    let (status, body) = call(&router, "POST", "/v1/request/k8s-admin", Some(&ALICE), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let nonce = body["request"]["nonce"].as_str().unwrap().to_string();
    assert_eq!(body["lease"]["kind"], "request");

    let (_, body) = call(&router, "GET", "/v1/requests/k8s-admin", None, None).await;
    assert_eq!(body["keys"], json!([nonce]));

    let (status, body) = call(
        &router,
        "POST",
        "/v1/approve/k8s-admin",
        Some(&BOB),
        Some(json!({"nonce": nonce, "reason": "change ticket OPS-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["approval_count"], 1);

    let (status, body) =
        call(&router, "POST", "/v1/issue/k8s-admin", Some(&ALICE), Some(json!({"nonce": nonce}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    call(&router, "POST", "/v1/approve/k8s-admin", Some(&CAROL), Some(json!({"nonce": nonce}))).await;

    let (status, body) = call(
        &router,
        "POST",
        "/v1/issue/k8s-admin",
        Some(&ALICE),
        Some(json!({"nonce": nonce, "ttl": "30m"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["kubeconfig"], "top-secret");
    assert_eq!(body["lease_ttl_seconds"], 1800);
    let lease = body["lease"].clone();

    let (_, body) = call(&router, "GET", "/v1/issues/k8s-admin", None, None).await;
    assert_eq!(body["keys"], json!([nonce]));

    let (status, body) = call(&router, "POST", "/v1/leases/renew", None, Some(lease.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("cannot be renewed"));

    let (status, _) = call(&router, "POST", "/v1/leases/revoke", None, Some(lease)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = call(&router, "GET", "/v1/issues/k8s-admin", None, None).await;
    assert_eq!(body["keys"], json!([]));
}

#[tokio::test]
async fn expired_request_is_gone() {
    let h = Harness::new().await;
    h.k8s_admin_role().await;
    let router = build_router(h.backend.clone());

    let (_, body) = call(&router, "POST", "/v1/request/k8s-admin", Some(&ALICE), None).await;
    let nonce = body["request"]["nonce"].as_str().unwrap().to_string();

    h.advance_minutes(11);
    let (status, body) = call(
        &router,
        "GET",
        &format!("/v1/requests/k8s-admin/{}", nonce),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"], "expired");
}

#[tokio::test]
async fn missing_caller_headers_are_denied() {
    let h = Harness::new().await;
    h.k8s_admin_role().await;
    let router = build_router(h.backend.clone());

    let (status, _) = call(&router, "POST", "/v1/request/k8s-admin", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
