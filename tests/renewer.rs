//! Background renewer: service-token renewal and expired request sweep.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use approved_secrets::config::HousekeepingConfig;
use approved_secrets::secrets::TokenBroker;
use approved_secrets::services::{IssueParams, Renewer};
use common::{caller, Harness};

fn renewer(h: &Harness) -> Renewer {
    Renewer::new(
        h.backend.config.clone(),
        h.backend.ledger.clone(),
        h.broker.clone(),
        HousekeepingConfig::default(),
    )
}

#[tokio::test]
async fn renews_with_the_configured_increment() {
    let h = Harness::new().await;
    assert!(renewer(&h).renew_once().await.unwrap());
    assert_eq!(h.broker.renewals.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn nothing_to_renew_before_configuration() {
    let h = Harness::unconfigured();
    assert!(!renewer(&h).renew_once().await.unwrap());
    assert_eq!(h.broker.renewals.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn renewal_failure_surfaces_to_the_single_pass() {
    let h = Harness::new().await;
    h.broker.fail_renew.store(true, Ordering::SeqCst);
    assert!(renewer(&h).renew_once().await.is_err());
}

#[tokio::test]
async fn sweep_removes_expired_requests() {
    let h = Harness::new().await;
    h.k8s_admin_role().await;
    h.backend.ledger.open("k8s-admin", &caller("alice", &["dev"])).await.unwrap();
    h.backend.ledger.open("k8s-admin", &caller("alice", &["dev"])).await.unwrap();

    let renewer = renewer(&h);
    assert_eq!(renewer.sweep_once().await.unwrap(), 0);

    h.advance_minutes(11);
    assert_eq!(renewer.sweep_once().await.unwrap(), 2);
    // Only the backend config and the role remain
    assert_eq!(h.storage.len().await, 2);
}

#[tokio::test]
async fn sweep_removes_ended_issues() {
    let h = Harness::new().await;
    h.k8s_admin_role().await;
    let alice = caller("alice", &["dev"]);
    let nonce = h.backend.ledger.open("k8s-admin", &alice).await.unwrap().request.nonce;
    for approver in ["bob", "carol"] {
        h.backend.approvals.approve("k8s-admin", &nonce, &caller(approver, &["sre"]), None).await.unwrap();
    }
    h.backend.issuance.issue("k8s-admin", &nonce, &alice, IssueParams::default()).await.unwrap();

    let renewer = renewer(&h);
    h.advance_minutes(30);
    assert_eq!(renewer.sweep_once().await.unwrap(), 0);
    assert_eq!(h.backend.leases.list_issues("k8s-admin").await.unwrap(), vec![nonce]);

    // The role's lease is one hour
    h.advance_minutes(31);
    assert_eq!(renewer.sweep_once().await.unwrap(), 1);
    assert!(h.backend.leases.list_issues("k8s-admin").await.unwrap().is_empty());
    assert_eq!(h.storage.len().await, 2);
}

#[tokio::test]
async fn failing_loop_keeps_running_until_stopped() {
    let h = Harness::new().await;
    h.broker.fail_renew.store(true, Ordering::SeqCst);

    let handle = Renewer::new(
        h.backend.config.clone(),
        h.backend.ledger.clone(),
        Arc::clone(&h.broker) as Arc<dyn TokenBroker>,
        HousekeepingConfig {
            renew_interval_seconds: 1,
            renew_increment_seconds: 60,
            sweep_interval_seconds: 1,
        },
    )
    .spawn();

    // First tick fires immediately
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.broker.renewals.load(Ordering::SeqCst) >= 1);

    let stopped = tokio::time::timeout(Duration::from_secs(2), handle.stop()).await;
    assert!(stopped.is_ok(), "renewer should stop promptly");
}

#[tokio::test]
async fn backend_start_and_stop() {
    let h = Harness::new().await;
    h.backend.start().await;
    h.backend.start().await;
    assert!(h.backend.is_running().await);

    tokio::time::timeout(Duration::from_secs(2), h.backend.stop()).await.unwrap();
    assert!(!h.backend.is_running().await);
}
