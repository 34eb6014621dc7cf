use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use credmint_core::{AppError, AppResult, ProjectId, RoleSetName};
use credmint_domain::{
    PendingOperation, PendingOperationKind, ResourceBindings, RoleSet, SecretKind,
    ServiceAccountRef,
};
use tracing::{info, warn};

use crate::binding_reconciler::BindingReconciler;
use crate::ports::{CreateRoleSetInput, IamClient, RecoveryLogRepository, RoleSetRepository,
    UpdateRoleSetInput};

/// Remote account ids are capped at 30 characters.
const ACCOUNT_ID_MAX_LENGTH: usize = 30;
const ACCOUNT_ID_PREFIX: &str = "cm-";
const ACCOUNT_ID_SUFFIX_LENGTH: usize = 8;

/// Manages the role-set lifecycle: creation with account provisioning and
/// binding reconciliation, in-place updates, and teardown.
#[derive(Clone)]
pub struct RoleSetService {
    repository: Arc<dyn RoleSetRepository>,
    recovery_log: Arc<dyn RecoveryLogRepository>,
    iam: Arc<dyn IamClient>,
    reconciler: BindingReconciler,
}

impl RoleSetService {
    /// Creates the service over its storage and remote ports.
    #[must_use]
    pub fn new(
        repository: Arc<dyn RoleSetRepository>,
        recovery_log: Arc<dyn RecoveryLogRepository>,
        iam: Arc<dyn IamClient>,
        reconciler: BindingReconciler,
    ) -> Self {
        Self {
            repository,
            recovery_log,
            iam,
            reconciler,
        }
    }

    /// Creates a role set: validates the request, provisions a dedicated
    /// service account, reconciles the requested grants, and stores the
    /// record.
    ///
    /// On a reconciliation failure the provisioned account is torn down
    /// again before the error is returned, so a failed create leaves no
    /// half-permissioned identity behind.
    pub async fn create(&self, input: CreateRoleSetInput) -> AppResult<RoleSet> {
        let name = RoleSetName::new(&input.name)?;
        let project = ProjectId::new(&input.project)?;
        let secret_kind = SecretKind::from_str(&input.secret_kind)?;
        let bindings = ResourceBindings::parse(&input.bindings)?;

        // A duplicate name can never succeed on retry, so this is a caller
        // error rather than a concurrency conflict.
        if self.repository.find(&name).await?.is_some() {
            return Err(AppError::Validation(format!(
                "role set '{name}' already exists"
            )));
        }

        let account_id = derive_account_id(&name);
        let planned_account = planned_account_ref(&project, &account_id)?;

        // Fail every validation before the first remote call.
        let draft = RoleSet::new(
            name.clone(),
            project.clone(),
            secret_kind,
            planned_account.clone(),
            bindings.clone(),
            input.token_scopes.clone(),
        )?;

        let create_op = PendingOperation::new(
            PendingOperationKind::CreateServiceAccount,
            name.clone(),
            planned_account,
            None,
            BTreeSet::new(),
        );
        self.recovery_log.record(create_op.clone()).await?;

        let account = self
            .iam
            .create_service_account(&project, &account_id, name.as_str())
            .await?;

        let role_set = RoleSet::new(
            name.clone(),
            project,
            secret_kind,
            account.clone(),
            bindings.clone(),
            input.token_scopes,
        )?;

        if let Err(error) = self.reconciler.apply(&name, &account, &bindings).await {
            self.roll_back_account(&name, &account, &bindings).await;
            return Err(AppError::Provisioning(format!(
                "could not grant bindings for role set '{name}': {error}"
            )));
        }

        if let Err(error) = self.repository.insert(role_set.clone()).await {
            self.roll_back_account(&name, &account, &bindings).await;
            return Err(error);
        }

        self.recovery_log.clear(create_op.op_id()).await?;
        info!(role_set = %name, account = account.email(), version = draft.version(), "role set created");
        Ok(role_set)
    }

    /// Returns one stored role set.
    pub async fn get(&self, name: &RoleSetName) -> AppResult<RoleSet> {
        self.repository
            .find(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("role set '{name}' does not exist")))
    }

    /// Lists all stored role-set names.
    pub async fn list(&self) -> AppResult<Vec<RoleSetName>> {
        self.repository.list_names().await
    }

    /// Updates a role set's bindings and/or scopes in place.
    ///
    /// The owned service account is kept; only the difference between the
    /// old and new grant sets touches the remote policies. The store write
    /// is a compare-and-swap on the starting version, so a concurrent
    /// update on the same role set fails with a conflict instead of
    /// silently losing grants.
    pub async fn update(&self, name: &RoleSetName, input: UpdateRoleSetInput) -> AppResult<RoleSet> {
        let current = self.get(name).await?;
        let starting_version = current.version();

        let new_bindings = input
            .bindings
            .as_ref()
            .map(ResourceBindings::parse)
            .transpose()?;
        let updated = current.with_update(new_bindings, input.token_scopes)?;

        let added = updated.bindings().added_since(current.bindings());
        let removed = updated.bindings().removed_since(current.bindings());

        if !removed.is_empty() {
            self.reconciler
                .remove(name, current.account(), &removed)
                .await?;
        }
        if !added.is_empty() {
            self.reconciler
                .apply(name, current.account(), &added)
                .await?;
        }

        self.repository
            .update(updated.clone(), starting_version)
            .await?;
        info!(role_set = %name, version = updated.version(), "role set updated");
        Ok(updated)
    }

    /// Deletes a role set: revokes its grants, deletes the owned service
    /// account, and removes the stored record.
    ///
    /// Deleting the account invalidates every credential it ever issued.
    /// Each teardown step tolerates already-gone remote state, so a
    /// partially failed delete can simply be retried.
    pub async fn delete(&self, name: &RoleSetName) -> AppResult<()> {
        let role_set = self.get(name).await?;
        let account = role_set.account();

        self.reconciler
            .remove(name, account, role_set.bindings())
            .await?;

        let delete_op = PendingOperation::new(
            PendingOperationKind::DeleteServiceAccount,
            name.clone(),
            account.clone(),
            None,
            BTreeSet::new(),
        );
        self.recovery_log.record(delete_op.clone()).await?;

        match self.iam.delete_service_account(account.resource_name()).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {
                // Already gone; a previous partially-failed delete got this
                // far.
            }
            Err(error) => return Err(error),
        }
        self.recovery_log.clear(delete_op.op_id()).await?;

        match self.repository.delete(name).await {
            Ok(()) | Err(AppError::NotFound(_)) => {}
            Err(error) => return Err(error),
        }

        info!(role_set = %name, account = account.email(), "role set deleted");
        Ok(())
    }

    /// Best-effort teardown of a freshly provisioned account after a failed
    /// create. Failures stay in the recovery log for the sweep.
    async fn roll_back_account(
        &self,
        name: &RoleSetName,
        account: &ServiceAccountRef,
        bindings: &ResourceBindings,
    ) {
        if let Err(error) = self.reconciler.remove(name, account, bindings).await {
            warn!(
                role_set = %name,
                account = account.email(),
                %error,
                "rollback could not revoke grants, leaving trace for the sweep"
            );
        }

        let delete_op = PendingOperation::new(
            PendingOperationKind::DeleteServiceAccount,
            name.clone(),
            account.clone(),
            None,
            BTreeSet::new(),
        );
        let recorded = self.recovery_log.record(delete_op.clone()).await.is_ok();

        match self.iam.delete_service_account(account.resource_name()).await {
            Ok(()) | Err(AppError::NotFound(_)) => {
                if recorded {
                    if let Err(error) = self.recovery_log.clear(delete_op.op_id()).await {
                        warn!(role_set = %name, %error, "could not clear rollback trace");
                    }
                }
            }
            Err(error) => {
                warn!(
                    role_set = %name,
                    account = account.email(),
                    %error,
                    "rollback could not delete account, leaving trace for the sweep"
                );
            }
        }
    }
}

/// Derives a remote account id from the role-set name: a fixed prefix, the
/// sanitized name, and a random suffix to keep recreations distinct.
fn derive_account_id(name: &RoleSetName) -> String {
    let sanitized: String = name
        .as_str()
        .chars()
        .map(|character| if character == '_' { '-' } else { character })
        .collect();

    let budget = ACCOUNT_ID_MAX_LENGTH - ACCOUNT_ID_PREFIX.len() - ACCOUNT_ID_SUFFIX_LENGTH - 1;
    let stem: String = sanitized.chars().take(budget).collect();
    let stem = stem.trim_end_matches('-');

    let mut bytes = [0_u8; ACCOUNT_ID_SUFFIX_LENGTH / 2];
    getrandom::fill(&mut bytes).unwrap_or(());
    let suffix: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();

    format!("{ACCOUNT_ID_PREFIX}{stem}-{suffix}")
}

/// Builds the account reference the remote create is expected to return.
/// Emails are a pure function of project and account id.
fn planned_account_ref(project: &ProjectId, account_id: &str) -> AppResult<ServiceAccountRef> {
    let email = format!("{account_id}@{}.iam.gserviceaccount.com", project.as_str());
    ServiceAccountRef::new(
        format!("projects/{}/serviceAccounts/{email}", project.as_str()),
        email,
    )
}
