//! Property: issuing succeeds exactly when at least `min_approvers` distinct
//! identities approved, whatever the order and however many duplicates.

mod common;

use std::collections::BTreeSet;

use approved_secrets::errors::ApprovalError;
use approved_secrets::services::IssueParams;
use common::{caller, role_input, Harness};
use proptest::prelude::*;

const APPROVERS: [&str; 4] = ["bob", "carol", "erin", "frank"];
const MIN_APPROVERS: usize = 2;

async fn run(sequence: Vec<usize>) -> (usize, Result<(), ApprovalError>) {
    let h = Harness::new().await;
    h.backend
        .roles
        .put(
            "k8s-admin",
            role_input(serde_json::json!({
                "secret_path": "secret/data/k8s/admin",
                "min_approvers": MIN_APPROVERS,
                "bound_approver_roles": ["sre"],
            })),
        )
        .await
        .unwrap();

    let nonce = h
        .backend
        .ledger
        .open("k8s-admin", &caller("alice", &["dev"]))
        .await
        .unwrap()
        .request
        .nonce;

    let mut count = 0;
    for idx in sequence {
        count = h
            .backend
            .approvals
            .approve("k8s-admin", &nonce, &caller(APPROVERS[idx], &["sre"]), None)
            .await
            .unwrap()
            .approval_count;
    }

    let issued = h
        .backend
        .issuance
        .issue("k8s-admin", &nonce, &caller("alice", &["dev"]), IssueParams::default())
        .await
        .map(|_| ());
    (count, issued)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn issue_depends_only_on_distinct_approvers(
        sequence in prop::collection::vec(0usize..APPROVERS.len(), 0..10)
    ) {
        let distinct: BTreeSet<usize> = sequence.iter().copied().collect();
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (count, issued) = runtime.block_on(run(sequence));

        prop_assert_eq!(count, distinct.len());
        if distinct.len() >= MIN_APPROVERS {
            prop_assert!(issued.is_ok());
        } else {
            let denied = matches!(issued, Err(ApprovalError::PermissionDenied { .. }));
            prop_assert!(denied);
        }
    }
}
