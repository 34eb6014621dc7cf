use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use credmint_core::{AppError, AppResult};
use credmint_domain::{PendingOperation, PendingOperationKind, ServiceAccountRef};
use tracing::{error, info, warn};

use crate::binding_reconciler::{jittered_delay_ms, mutate_policy_grants};
use crate::ports::{IamClient, RecoveryLogRepository, RoleSetRepository};

/// Outcome of one sweep pass over the recovery log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries old enough to be examined this pass.
    pub examined: usize,
    /// Entries resolved and cleared.
    pub completed: usize,
    /// Entries left in place after a failed resolution attempt.
    pub deferred: usize,
}

/// Resolves stale recovery-log entries left behind by crashed or failed
/// multi-step mutations.
///
/// Each entry is driven to a consistent end state: forward when the stored
/// role set still wants the mutation, backward when it does not. Every
/// resolution step is idempotent, so sweeping an entry whose work actually
/// finished is harmless.
#[derive(Clone)]
pub struct RecoverySweeper {
    iam: Arc<dyn IamClient>,
    repository: Arc<dyn RoleSetRepository>,
    recovery_log: Arc<dyn RecoveryLogRepository>,
    min_entry_age: Duration,
    max_policy_attempts: u8,
    retry_backoff_ms: u64,
}

impl RecoverySweeper {
    /// Creates a sweeper that only touches entries older than
    /// `min_entry_age`, leaving genuinely in-flight operations alone.
    #[must_use]
    pub fn new(
        iam: Arc<dyn IamClient>,
        repository: Arc<dyn RoleSetRepository>,
        recovery_log: Arc<dyn RecoveryLogRepository>,
        min_entry_age: Duration,
        max_policy_attempts: u8,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            iam,
            repository,
            recovery_log,
            min_entry_age: min_entry_age.max(Duration::zero()),
            max_policy_attempts: max_policy_attempts.max(1),
            retry_backoff_ms: retry_backoff_ms.max(50),
        }
    }

    /// Runs one sweep pass and reports what it did.
    ///
    /// Entries that cannot be resolved stay in the log for the next pass and
    /// raise an operator alert; the sweep never gives up on an entry.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let cutoff = Utc::now() - self.min_entry_age;
        let stale = self.recovery_log.list_recorded_before(cutoff).await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for operation in stale {
            match self.resolve(&operation).await {
                Ok(()) => {
                    self.recovery_log.clear(operation.op_id()).await?;
                    report.completed += 1;
                }
                Err(resolve_error) => {
                    error!(
                        op_id = %operation.op_id(),
                        kind = operation.kind().as_str(),
                        role_set = %operation.role_set(),
                        error = %resolve_error,
                        "recovery entry could not be resolved, operator attention needed"
                    );
                    report.deferred += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                completed = report.completed,
                deferred = report.deferred,
                "recovery sweep pass finished"
            );
        }
        Ok(report)
    }

    async fn resolve(&self, operation: &PendingOperation) -> AppResult<()> {
        match operation.kind() {
            PendingOperationKind::CreateServiceAccount => self.resolve_create(operation).await,
            PendingOperationKind::ApplyBindings => self.resolve_apply(operation).await,
            PendingOperationKind::RemoveBindings => {
                self.resolve_policy(operation, false).await
            }
            PendingOperationKind::DeleteServiceAccount => self.resolve_delete(operation).await,
        }
    }

    /// A stale account creation either completed (the role-set record made
    /// it to storage) or died mid-flight. Completed creations just lose
    /// their log entry; dead ones get their orphaned account deleted.
    async fn resolve_create(&self, operation: &PendingOperation) -> AppResult<()> {
        if self.repository.find(operation.role_set()).await?.is_some() {
            return Ok(());
        }

        let resource_name = operation.account().resource_name();
        match self.iam.delete_service_account(resource_name).await {
            Ok(()) => {
                warn!(
                    role_set = %operation.role_set(),
                    account = operation.account().email(),
                    "deleted orphaned service account from a failed creation"
                );
                Ok(())
            }
            Err(AppError::NotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// A stale grant application replays forward only the roles the stored
    /// role set still binds on the operation's resource for the same
    /// account. Everything else in the entry is revoked, so the account
    /// never ends up holding more than the stored bindings.
    async fn resolve_apply(&self, operation: &PendingOperation) -> AppResult<()> {
        let Some(resource) = operation.resource() else {
            return Err(AppError::Internal(format!(
                "binding operation {} carries no resource",
                operation.op_id()
            )));
        };

        let wanted: BTreeSet<String> = match self.repository.find(operation.role_set()).await? {
            Some(role_set) if role_set.account() == operation.account() => role_set
                .bindings()
                .roles_for(resource)
                .map(|bound| operation.roles().intersection(bound).cloned().collect())
                .unwrap_or_default(),
            _ => BTreeSet::new(),
        };
        let unwanted: BTreeSet<String> =
            operation.roles().difference(&wanted).cloned().collect();

        if !wanted.is_empty() {
            self.mutate_policy(resource, operation.account(), &wanted, true)
                .await?;
        }
        if !unwanted.is_empty() {
            self.mutate_policy(resource, operation.account(), &unwanted, false)
                .await?;
        }
        Ok(())
    }

    async fn resolve_policy(&self, operation: &PendingOperation, apply: bool) -> AppResult<()> {
        let Some(resource) = operation.resource() else {
            return Err(AppError::Internal(format!(
                "binding operation {} carries no resource",
                operation.op_id()
            )));
        };
        self.mutate_policy(resource, operation.account(), operation.roles(), apply)
            .await
    }

    /// Replays one policy mutation with the same additive or subtractive
    /// semantics the live path uses.
    async fn mutate_policy(
        &self,
        resource: &str,
        account: &ServiceAccountRef,
        roles: &BTreeSet<String>,
        apply: bool,
    ) -> AppResult<()> {
        let member = account.member();
        let mut attempt = 0_u8;

        loop {
            attempt = attempt.saturating_add(1);

            let mut policy = match self.iam.get_resource_policy(resource).await {
                Ok(policy) => policy,
                Err(AppError::NotFound(_)) if !apply => return Ok(()),
                Err(error) => return Err(error),
            };

            if !mutate_policy_grants(&mut policy, member.as_str(), roles, apply) {
                return Ok(());
            }

            match self.iam.set_resource_policy(resource, policy).await {
                Ok(()) => return Ok(()),
                Err(AppError::Conflict(reason)) if attempt < self.max_policy_attempts => {
                    warn!(resource, attempt, reason, "sweep policy write raced, re-fetching");
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

    /// A stale account deletion always replays forward; the account was
    /// condemned the moment the entry was written.
    async fn resolve_delete(&self, operation: &PendingOperation) -> AppResult<()> {
        match self
            .iam
            .delete_service_account(operation.account().resource_name())
            .await
        {
            Ok(()) | Err(AppError::NotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::Duration;
    use credmint_core::RoleSetName;
    use credmint_domain::{PendingOperation, PendingOperationKind};
    use serde_json::json;

    use crate::binding_reconciler::BindingReconciler;
    use crate::ports::{CreateRoleSetInput, RecoveryLogRepository};
    use crate::role_set_service::RoleSetService;
    use crate::test_support::{FakeIamClient, FakeRecoveryLog, FakeRoleSetRepository, account};

    use super::RecoverySweeper;

    struct Harness {
        iam: Arc<FakeIamClient>,
        log: Arc<FakeRecoveryLog>,
        repository: Arc<FakeRoleSetRepository>,
        sweeper: RecoverySweeper,
    }

    fn harness() -> Harness {
        let iam = Arc::new(FakeIamClient::new());
        let log = Arc::new(FakeRecoveryLog::new());
        let repository = Arc::new(FakeRoleSetRepository::new());
        let sweeper = RecoverySweeper::new(
            iam.clone(),
            repository.clone(),
            log.clone(),
            Duration::zero(),
            3,
            50,
        );
        Harness {
            iam,
            log,
            repository,
            sweeper,
        }
    }

    fn name(value: &str) -> RoleSetName {
        RoleSetName::new(value).unwrap_or_else(|_| unreachable!())
    }

    fn roles(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|role| (*role).to_owned()).collect()
    }

    async fn seed_role_set(h: &Harness, role_set_name: &str) -> credmint_domain::RoleSet {
        h.iam.register_resource("projects/demo").await;
        let reconciler = BindingReconciler::new(h.iam.clone(), h.log.clone(), 3, 50);
        let service = RoleSetService::new(
            h.repository.clone(),
            h.log.clone(),
            h.iam.clone(),
            reconciler,
        );
        service
            .create(CreateRoleSetInput {
                name: role_set_name.to_owned(),
                project: "demo".to_owned(),
                secret_kind: "service_account_key".to_owned(),
                bindings: json!({"projects/demo": ["roles/viewer"]}),
                token_scopes: Vec::new(),
            })
            .await
            .unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn empty_log_sweeps_to_an_empty_report() {
        let h = harness();
        let report = h.sweeper.sweep().await;
        assert!(report.is_ok());
        assert_eq!(report.map(|report| report.examined).unwrap_or(1), 0);
    }

    #[tokio::test]
    async fn orphaned_account_from_a_dead_creation_is_deleted() {
        let h = harness();
        // An account exists remotely but its role-set record never landed.
        let orphan = h.iam.seed_account("demo", "cm-dead-create").await;
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::CreateServiceAccount,
                name("dead-create"),
                orphan.clone(),
                None,
                BTreeSet::new(),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let report = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(report.completed, 1);
        assert_eq!(h.iam.account_count().await, 0);
        assert_eq!(h.log.open_entry_count().await, 0);
    }

    #[tokio::test]
    async fn completed_creation_just_loses_its_stale_entry() {
        let h = harness();
        let role_set = seed_role_set(&h, "alive").await;

        // The create finished but its log entry was never cleared.
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::CreateServiceAccount,
                name("alive"),
                role_set.account().clone(),
                None,
                BTreeSet::new(),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let report = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(report.completed, 1);
        // The live account is untouched.
        assert_eq!(h.iam.account_count().await, 1);
    }

    #[tokio::test]
    async fn wanted_grant_application_replays_forward() {
        let h = harness();
        let role_set = seed_role_set(&h, "alive").await;
        let member = role_set.account().member();

        // A grant the role set wants never made it to the policy.
        h.iam
            .revoke_externally("projects/demo", "roles/viewer", member.as_str())
            .await;
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::ApplyBindings,
                name("alive"),
                role_set.account().clone(),
                Some("projects/demo".to_owned()),
                roles(&["roles/viewer"]),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let report = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(report.completed, 1);
        assert!(h.iam.has_grant("projects/demo", "roles/viewer", member.as_str()).await);
    }

    #[tokio::test]
    async fn stale_grant_beyond_stored_bindings_is_revoked_not_applied() {
        let h = harness();
        let role_set = seed_role_set(&h, "alive").await;
        let member = role_set.account().member();

        // A failed update left an editor grant half-applied and logged; the
        // stored role set only binds viewer, and the viewer grant itself
        // went missing mid-flight.
        h.iam
            .revoke_externally("projects/demo", "roles/viewer", member.as_str())
            .await;
        h.iam
            .grant_externally("projects/demo", "roles/editor", member.as_str())
            .await;
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::ApplyBindings,
                name("alive"),
                role_set.account().clone(),
                Some("projects/demo".to_owned()),
                roles(&["roles/viewer", "roles/editor"]),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let report = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(report.completed, 1);
        // Only the still-bound role comes back; the stray grant is revoked.
        assert!(h.iam.has_grant("projects/demo", "roles/viewer", member.as_str()).await);
        assert!(!h.iam.has_grant("projects/demo", "roles/editor", member.as_str()).await);
    }

    #[tokio::test]
    async fn unwanted_grant_application_is_revoked() {
        let h = harness();
        h.iam.register_resource("projects/demo").await;
        // The role set is gone but its half-applied grant survived.
        let ghost = account("demo", "ghost");
        h.iam
            .grant_externally("projects/demo", "roles/editor", ghost.member().as_str())
            .await;
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::ApplyBindings,
                name("ghost"),
                ghost.clone(),
                Some("projects/demo".to_owned()),
                roles(&["roles/editor"]),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let report = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(report.completed, 1);
        assert!(
            !h.iam
                .has_grant("projects/demo", "roles/editor", ghost.member().as_str())
                .await
        );
    }

    #[tokio::test]
    async fn stale_removal_replays_the_revocation() {
        let h = harness();
        h.iam.register_resource("projects/demo").await;
        let departing = account("demo", "departing");
        h.iam
            .grant_externally("projects/demo", "roles/viewer", departing.member().as_str())
            .await;
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::RemoveBindings,
                name("departing"),
                departing.clone(),
                Some("projects/demo".to_owned()),
                roles(&["roles/viewer"]),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let report = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(report.completed, 1);
        assert!(
            !h.iam
                .has_grant("projects/demo", "roles/viewer", departing.member().as_str())
                .await
        );
    }

    #[tokio::test]
    async fn stale_account_deletion_replays_forward() {
        let h = harness();
        let condemned = h.iam.seed_account("demo", "cm-condemned").await;
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::DeleteServiceAccount,
                name("condemned"),
                condemned,
                None,
                BTreeSet::new(),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let report = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(report.completed, 1);
        assert_eq!(h.iam.account_count().await, 0);
    }

    #[tokio::test]
    async fn unresolvable_entries_stay_for_the_next_pass() {
        let h = harness();
        let orphan = h.iam.seed_account("demo", "cm-stuck").await;
        h.iam.inject_account_deletion_outages(1).await;
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::DeleteServiceAccount,
                name("stuck"),
                orphan,
                None,
                BTreeSet::new(),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let first = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(first.deferred, 1);
        assert_eq!(h.log.open_entry_count().await, 1);

        // The outage clears; the next pass finishes the job.
        let second = h.sweeper.sweep().await.unwrap_or_default();
        assert_eq!(second.completed, 1);
        assert_eq!(h.log.open_entry_count().await, 0);
    }

    #[tokio::test]
    async fn fresh_entries_are_left_alone() {
        let h = harness();
        let young_sweeper = RecoverySweeper::new(
            h.iam.clone(),
            h.repository.clone(),
            h.log.clone(),
            Duration::minutes(5),
            3,
            50,
        );

        let orphan = h.iam.seed_account("demo", "cm-fresh").await;
        h.log
            .record(PendingOperation::new(
                PendingOperationKind::CreateServiceAccount,
                name("fresh"),
                orphan,
                None,
                BTreeSet::new(),
            ))
            .await
            .unwrap_or_else(|_| unreachable!());

        let report = young_sweeper.sweep().await.unwrap_or_default();
        assert_eq!(report.examined, 0);
        // The in-flight creation keeps its account.
        assert_eq!(h.iam.account_count().await, 1);
    }
}
