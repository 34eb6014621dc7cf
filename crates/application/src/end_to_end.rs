//! Full lifecycle test across the service layer.

use std::sync::Arc;

use chrono::Duration;
use credmint_core::{AppError, RoleSetName};
use credmint_domain::LeaseConfig;
use serde_json::json;

use crate::binding_reconciler::BindingReconciler;
use crate::credential_service::CredentialService;
use crate::lease_service::LeaseService;
use crate::ports::{CreateRoleSetInput, RoleSetRepository};
use crate::role_set_service::RoleSetService;
use crate::test_support::{FakeIamClient, FakeRecoveryLog, FakeRoleSetRepository};

#[tokio::test]
async fn key_role_set_lifecycle_from_creation_to_teardown() {
    let iam = Arc::new(FakeIamClient::new());
    let log = Arc::new(FakeRecoveryLog::new());
    let repository = Arc::new(FakeRoleSetRepository::new());
    let reconciler = BindingReconciler::new(iam.clone(), log.clone(), 3, 50);
    let role_sets = RoleSetService::new(repository.clone(), log.clone(), iam.clone(), reconciler);
    let credentials = CredentialService::new(repository.clone(), iam.clone());
    let leases = LeaseService::new(iam.clone());

    iam.register_resource("projects/demo").await;
    let config = LeaseConfig::from_seconds(3600, 7200).unwrap_or_else(|_| unreachable!());
    let name = RoleSetName::new("rs1").unwrap_or_else(|_| unreachable!());

    let created = role_sets
        .create(CreateRoleSetInput {
            name: "rs1".to_owned(),
            project: "demo".to_owned(),
            secret_kind: "service_account_key".to_owned(),
            bindings: json!({"projects/demo": ["roles/viewer"]}),
            token_scopes: Vec::new(),
        })
        .await;
    assert!(created.is_ok());
    let role_set = created.unwrap_or_else(|_| unreachable!());
    let member = role_set.account().member();
    assert!(
        iam.has_grant("projects/demo", "roles/viewer", member.as_str())
            .await
    );

    // No override: the default TTL applies.
    let default_key = credentials.issue_key(&name, config, None).await;
    assert!(default_key.is_ok());
    let default_key = default_key.unwrap_or_else(|_| unreachable!());
    assert_eq!(default_key.lease().ttl(), Duration::seconds(3600));

    // A 60s override sticks, and the max lease duration stays at 2h.
    let short_key = credentials
        .issue_key(&name, config, Some(Duration::seconds(60)))
        .await;
    assert!(short_key.is_ok());
    let short_key = short_key.unwrap_or_else(|_| unreachable!());
    assert_eq!(short_key.lease().ttl(), Duration::seconds(60));
    assert_eq!(short_key.lease().max_ttl(), Duration::seconds(7200));

    // Revocation deletes the remote key; repeating it stays a success.
    assert!(leases.revoke_key(short_key.lease()).await.is_ok());
    assert!(!iam.key_exists(short_key.lease().key_name()).await);
    assert!(leases.revoke_key(short_key.lease()).await.is_ok());

    // A revoked key can no longer renew its lease.
    let dead_renewal = leases
        .renew_key(
            short_key.lease(),
            short_key.lease().issued_at() + Duration::seconds(30),
            Duration::seconds(60),
        )
        .await;
    assert!(matches!(dead_renewal, Err(AppError::NotFound(_))));

    // Teardown removes the grant, the account, and the stored record.
    assert!(role_sets.delete(&name).await.is_ok());
    assert!(
        !iam.has_grant("projects/demo", "roles/viewer", member.as_str())
            .await
    );
    assert_eq!(iam.account_count().await, 0);
    assert!(repository.find(&name).await.unwrap_or_default().is_none());
    assert_eq!(log.open_entry_count().await, 0);
}
