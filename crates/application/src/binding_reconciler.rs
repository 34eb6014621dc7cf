use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use credmint_core::{AppError, AppResult, RoleSetName};
use credmint_domain::{PendingOperation, PendingOperationKind, ResourceBindings, ServiceAccountRef};
use tracing::warn;

use crate::ports::{IamClient, RecoveryLogRepository, ResourcePolicy};

/// Direction of one per-resource policy mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Apply,
    Remove,
}

/// Applies and removes role grants for a service account on remote
/// resources.
///
/// Every mutation is additive or subtractive against the fetched policy,
/// never a whole-policy overwrite, so grants managed by unrelated actors on
/// a shared resource survive. Each resource mutation is bracketed by a
/// recovery-log entry.
#[derive(Clone)]
pub struct BindingReconciler {
    iam: Arc<dyn IamClient>,
    recovery_log: Arc<dyn RecoveryLogRepository>,
    max_attempts: u8,
    retry_backoff_ms: u64,
}

impl BindingReconciler {
    /// Creates a reconciler with bounded conflict retries.
    #[must_use]
    pub fn new(
        iam: Arc<dyn IamClient>,
        recovery_log: Arc<dyn RecoveryLogRepository>,
        max_attempts: u8,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            iam,
            recovery_log,
            max_attempts: max_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
        }
    }

    /// Grants the desired roles to `account` on every bound resource.
    pub async fn apply(
        &self,
        role_set: &RoleSetName,
        account: &ServiceAccountRef,
        desired: &ResourceBindings,
    ) -> AppResult<()> {
        for (resource, roles) in desired.iter() {
            self.mutate_resource(role_set, account, resource, roles, Direction::Apply)
                .await?;
        }
        Ok(())
    }

    /// Removes exactly the managed role grants from every bound resource.
    ///
    /// A resource that no longer exists is treated as already clean.
    pub async fn remove(
        &self,
        role_set: &RoleSetName,
        account: &ServiceAccountRef,
        bound: &ResourceBindings,
    ) -> AppResult<()> {
        for (resource, roles) in bound.iter() {
            self.mutate_resource(role_set, account, resource, roles, Direction::Remove)
                .await?;
        }
        Ok(())
    }

    async fn mutate_resource(
        &self,
        role_set: &RoleSetName,
        account: &ServiceAccountRef,
        resource: &str,
        roles: &BTreeSet<String>,
        direction: Direction,
    ) -> AppResult<()> {
        let kind = match direction {
            Direction::Apply => PendingOperationKind::ApplyBindings,
            Direction::Remove => PendingOperationKind::RemoveBindings,
        };
        let operation = PendingOperation::new(
            kind,
            role_set.clone(),
            account.clone(),
            Some(resource.to_owned()),
            roles.clone(),
        );
        self.recovery_log.record(operation.clone()).await?;

        self.mutate_with_retry(account, resource, roles, direction)
            .await?;

        self.recovery_log.clear(operation.op_id()).await?;
        Ok(())
    }

    async fn mutate_with_retry(
        &self,
        account: &ServiceAccountRef,
        resource: &str,
        roles: &BTreeSet<String>,
        direction: Direction,
    ) -> AppResult<()> {
        let member = account.member();
        let mut attempt = 0_u8;

        loop {
            attempt = attempt.saturating_add(1);

            let mut policy = match self.iam.get_resource_policy(resource).await {
                Ok(policy) => policy,
                Err(AppError::NotFound(_)) if direction == Direction::Remove => {
                    // The resource was deleted out-of-band; nothing left to
                    // clean up.
                    return Ok(());
                }
                Err(error) => return Err(error),
            };

            if !mutate_policy(&mut policy, member.as_str(), roles, direction) {
                // Nothing to change; a retried or replayed mutation lands
                // here and stays idempotent.
                return Ok(());
            }

            match self.iam.set_resource_policy(resource, policy).await {
                Ok(()) => return Ok(()),
                Err(AppError::Conflict(reason)) => {
                    if attempt >= self.max_attempts {
                        return Err(AppError::Conflict(format!(
                            "policy write on '{resource}' for '{member}' lost {attempt} \
                             concurrency races, last: {reason}; retry the call"
                        )));
                    }

                    warn!(
                        resource,
                        member = %member,
                        attempt,
                        "policy write hit a concurrency conflict, re-fetching"
                    );
                    tokio::time::sleep(StdDuration::from_millis(jittered_delay_ms(
                        self.retry_backoff_ms,
                        attempt,
                    )))
                    .await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Mutates `policy` for `member` across `roles`, returning whether anything
/// changed. Shared with the recovery sweep so replays stay byte-identical
/// with first attempts.
pub(crate) fn mutate_policy_grants(
    policy: &mut ResourcePolicy,
    member: &str,
    roles: &BTreeSet<String>,
    apply: bool,
) -> bool {
    let direction = if apply {
        Direction::Apply
    } else {
        Direction::Remove
    };
    mutate_policy(policy, member, roles, direction)
}

fn mutate_policy(
    policy: &mut ResourcePolicy,
    member: &str,
    roles: &BTreeSet<String>,
    direction: Direction,
) -> bool {
    let mut changed = false;
    for role in roles {
        changed = match direction {
            Direction::Apply => policy.grant(role, member),
            Direction::Remove => policy.revoke(role, member),
        } || changed;
    }
    changed
}

/// Linear backoff with random jitter so two racing writers desynchronize.
pub(crate) fn jittered_delay_ms(base_ms: u64, attempt: u8) -> u64 {
    let mut bytes = [0_u8; 2];
    getrandom::fill(&mut bytes).unwrap_or(());
    let jitter = u64::from(u16::from_le_bytes(bytes)) % base_ms.max(1);

    base_ms.saturating_mul(u64::from(attempt)).saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use credmint_core::RoleSetName;
    use serde_json::json;


    use crate::test_support::{FakeIamClient, FakeRecoveryLog, account, bindings_from};

    use super::BindingReconciler;

    fn name(value: &str) -> RoleSetName {
        RoleSetName::new(value).unwrap_or_else(|_| unreachable!())
    }

    fn reconciler(
        iam: &Arc<FakeIamClient>,
        log: &Arc<FakeRecoveryLog>,
        max_attempts: u8,
    ) -> BindingReconciler {
        BindingReconciler::new(iam.clone(), log.clone(), max_attempts, 50)
    }

    #[tokio::test]
    async fn apply_grants_without_clobbering_external_members() {
        let iam = Arc::new(FakeIamClient::new());
        let log = Arc::new(FakeRecoveryLog::new());
        iam.register_resource("projects/demo").await;
        iam.grant_externally("projects/demo", "roles/viewer", "user:operator@example.com")
            .await;

        let account = account("demo", "rs");
        let bindings = bindings_from(&json!({"projects/demo": ["roles/viewer", "roles/editor"]}));

        let result = reconciler(&iam, &log, 3)
            .apply(&name("rs"), &account, &bindings)
            .await;
        assert!(result.is_ok());

        assert!(
            iam.has_grant("projects/demo", "roles/viewer", account.member().as_str())
                .await
        );
        assert!(
            iam.has_grant("projects/demo", "roles/editor", account.member().as_str())
                .await
        );
        assert!(
            iam.has_grant("projects/demo", "roles/viewer", "user:operator@example.com")
                .await
        );
    }

    #[tokio::test]
    async fn apply_retries_through_etag_conflicts() {
        let iam = Arc::new(FakeIamClient::new());
        let log = Arc::new(FakeRecoveryLog::new());
        iam.register_resource("projects/demo").await;
        iam.inject_set_policy_conflicts(2).await;

        let account = account("demo", "rs");
        let bindings = bindings_from(&json!({"projects/demo": ["roles/viewer"]}));

        let result = reconciler(&iam, &log, 4)
            .apply(&name("rs"), &account, &bindings)
            .await;
        assert!(result.is_ok());
        assert!(
            iam.has_grant("projects/demo", "roles/viewer", account.member().as_str())
                .await
        );
    }

    #[tokio::test]
    async fn apply_surfaces_retryable_error_after_conflict_budget() {
        let iam = Arc::new(FakeIamClient::new());
        let log = Arc::new(FakeRecoveryLog::new());
        iam.register_resource("projects/demo").await;
        iam.inject_set_policy_conflicts(10).await;

        let account = account("demo", "rs");
        let bindings = bindings_from(&json!({"projects/demo": ["roles/viewer"]}));

        let result = reconciler(&iam, &log, 2)
            .apply(&name("rs"), &account, &bindings)
            .await;
        assert!(result.is_err());
        assert!(
            result
                .err()
                .map(|error| error.is_retryable())
                .unwrap_or(false)
        );
        // The failed mutation leaves its recovery-log trace for the sweep.
        assert_eq!(log.open_entry_count().await, 1);
    }

    #[tokio::test]
    async fn remove_subtracts_only_managed_grants() {
        let iam = Arc::new(FakeIamClient::new());
        let log = Arc::new(FakeRecoveryLog::new());
        iam.register_resource("projects/demo").await;
        iam.grant_externally("projects/demo", "roles/viewer", "user:operator@example.com")
            .await;

        let account = account("demo", "rs");
        let bindings = bindings_from(&json!({"projects/demo": ["roles/viewer"]}));
        let worker = reconciler(&iam, &log, 3);

        assert!(worker.apply(&name("rs"), &account, &bindings).await.is_ok());
        assert!(worker.remove(&name("rs"), &account, &bindings).await.is_ok());

        assert!(
            !iam.has_grant("projects/demo", "roles/viewer", account.member().as_str())
                .await
        );
        assert!(
            iam.has_grant("projects/demo", "roles/viewer", "user:operator@example.com")
                .await
        );
    }

    #[tokio::test]
    async fn remove_treats_missing_resource_as_clean() {
        let iam = Arc::new(FakeIamClient::new());
        let log = Arc::new(FakeRecoveryLog::new());

        let account = account("demo", "rs");
        let bindings = bindings_from(&json!({"projects/vanished": ["roles/viewer"]}));

        let result = reconciler(&iam, &log, 3)
            .remove(&name("rs"), &account, &bindings)
            .await;
        assert!(result.is_ok());
        assert_eq!(log.open_entry_count().await, 0);
    }

    #[tokio::test]
    async fn successful_mutations_clear_their_log_entries() {
        let iam = Arc::new(FakeIamClient::new());
        let log = Arc::new(FakeRecoveryLog::new());
        iam.register_resource("projects/demo").await;

        let account = account("demo", "rs");
        let bindings = bindings_from(&json!({"projects/demo": ["roles/viewer"]}));

        let result = reconciler(&iam, &log, 3)
            .apply(&name("rs"), &account, &bindings)
            .await;
        assert!(result.is_ok());

        assert_eq!(log.open_entry_count().await, 0);
        assert!(log.recorded_entry_count().await >= 1);
    }
}
