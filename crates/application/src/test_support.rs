//! Shared in-memory fakes for service tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use credmint_core::{AppError, AppResult, ProjectId, RoleSetName};
use credmint_domain::{
    PendingOperation, ResourceBindings, RoleSet, ServiceAccountRef, KEY_ALGORITHM_RSA_2048,
    KEY_TYPE_GOOGLE_CREDENTIALS_FILE,
};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ports::{
    AccessTokenMaterial, IamClient, PolicyBinding, RecoveryLogRepository, ResourcePolicy,
    RoleSetRepository, ServiceAccountKeyMaterial,
};

/// Builds a service-account reference for `stem` in `project`.
pub fn account(project: &str, stem: &str) -> ServiceAccountRef {
    let email = format!("cm-{stem}@{project}.iam.gserviceaccount.com");
    ServiceAccountRef::new(
        format!("projects/{project}/serviceAccounts/{email}"),
        email,
    )
    .unwrap_or_else(|_| unreachable!())
}

/// Parses a JSON binding spec, panicking on invalid fixtures.
pub fn bindings_from(value: &Value) -> ResourceBindings {
    ResourceBindings::parse(value).unwrap_or_else(|_| unreachable!())
}

#[derive(Default)]
struct PolicyState {
    etag_counter: u64,
    bindings: Vec<PolicyBinding>,
}

impl PolicyState {
    fn etag(&self) -> String {
        format!("etag-{}", self.etag_counter)
    }
}

#[derive(Default)]
struct IamState {
    accounts: HashMap<String, ServiceAccountRef>,
    policies: HashMap<String, PolicyState>,
    keys: HashSet<String>,
    set_policy_conflicts: u8,
    account_deletion_outages: u8,
    key_deletion_outages: u8,
    token_lifetime_seconds: i64,
}

/// In-memory stand-in for the remote IAM surface with injectable failures.
pub struct FakeIamClient {
    state: RwLock<IamState>,
}

impl FakeIamClient {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IamState {
                token_lifetime_seconds: 3600,
                ..IamState::default()
            }),
        }
    }

    /// Makes a resource known so its policy can be fetched and written.
    pub async fn register_resource(&self, resource: &str) {
        let mut state = self.state.write().await;
        state.policies.entry(resource.to_owned()).or_default();
    }

    /// Adds a grant as an out-of-band actor would, bumping the etag.
    pub async fn grant_externally(&self, resource: &str, role: &str, member: &str) {
        let mut state = self.state.write().await;
        let policy = state.policies.entry(resource.to_owned()).or_default();
        if let Some(binding) = policy.bindings.iter_mut().find(|binding| binding.role == role) {
            binding.members.insert(member.to_owned());
        } else {
            policy.bindings.push(PolicyBinding {
                role: role.to_owned(),
                members: [member.to_owned()].into(),
            });
        }
        policy.etag_counter += 1;
    }

    /// Drops a grant as an out-of-band actor would, bumping the etag.
    pub async fn revoke_externally(&self, resource: &str, role: &str, member: &str) {
        let mut state = self.state.write().await;
        if let Some(policy) = state.policies.get_mut(resource) {
            for binding in &mut policy.bindings {
                if binding.role == role {
                    binding.members.remove(member);
                }
            }
            policy.bindings.retain(|binding| !binding.members.is_empty());
            policy.etag_counter += 1;
        }
    }

    pub async fn has_grant(&self, resource: &str, role: &str, member: &str) -> bool {
        let state = self.state.read().await;
        state
            .policies
            .get(resource)
            .map(|policy| {
                policy
                    .bindings
                    .iter()
                    .any(|binding| binding.role == role && binding.members.contains(member))
            })
            .unwrap_or(false)
    }

    /// Fails the next `count` policy writes with a stale-etag conflict.
    pub async fn inject_set_policy_conflicts(&self, count: u8) {
        self.state.write().await.set_policy_conflicts = count;
    }

    /// Fails the next `count` account deletions with a transient error.
    pub async fn inject_account_deletion_outages(&self, count: u8) {
        self.state.write().await.account_deletion_outages = count;
    }

    /// Fails the next `count` key deletions with a transient error.
    pub async fn inject_key_deletion_outages(&self, count: u8) {
        self.state.write().await.key_deletion_outages = count;
    }

    pub async fn set_token_lifetime_seconds(&self, seconds: i64) {
        self.state.write().await.token_lifetime_seconds = seconds;
    }

    pub async fn account_count(&self) -> usize {
        self.state.read().await.accounts.len()
    }

    /// Places an account remotely without going through creation.
    pub async fn seed_account(&self, project: &str, account_id: &str) -> ServiceAccountRef {
        let email = format!("{account_id}@{project}.iam.gserviceaccount.com");
        let account = ServiceAccountRef::new(
            format!("projects/{project}/serviceAccounts/{email}"),
            email,
        )
        .unwrap_or_else(|_| unreachable!());
        self.state
            .write()
            .await
            .accounts
            .insert(account.resource_name().to_owned(), account.clone());
        account
    }

    /// Places a key remotely, returning its resource name.
    pub async fn seed_key(&self, project: &str, stem: &str) -> String {
        let owner = account(project, stem);
        let key_name = format!(
            "{}/keys/{}",
            owner.resource_name(),
            Uuid::new_v4().simple()
        );
        self.state.write().await.keys.insert(key_name.clone());
        key_name
    }

    pub async fn key_exists(&self, key_name: &str) -> bool {
        self.state.read().await.keys.contains(key_name)
    }
}

#[async_trait]
impl IamClient for FakeIamClient {
    async fn create_service_account(
        &self,
        project: &ProjectId,
        account_id: &str,
        _display_name: &str,
    ) -> AppResult<ServiceAccountRef> {
        let email = format!("{account_id}@{}.iam.gserviceaccount.com", project.as_str());
        let account = ServiceAccountRef::new(
            format!("projects/{}/serviceAccounts/{email}", project.as_str()),
            email,
        )?;

        let mut state = self.state.write().await;
        if state.accounts.contains_key(account.resource_name()) {
            return Err(AppError::Conflict(format!(
                "service account '{account_id}' already exists"
            )));
        }
        state
            .accounts
            .insert(account.resource_name().to_owned(), account.clone());
        Ok(account)
    }

    async fn get_service_account(
        &self,
        resource_name: &str,
    ) -> AppResult<Option<ServiceAccountRef>> {
        Ok(self.state.read().await.accounts.get(resource_name).cloned())
    }

    async fn delete_service_account(&self, resource_name: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.account_deletion_outages > 0 {
            state.account_deletion_outages -= 1;
            return Err(AppError::TransientRemote(
                "account deletion outage injected".to_owned(),
            ));
        }

        if state.accounts.remove(resource_name).is_none() {
            return Err(AppError::NotFound(format!(
                "service account '{resource_name}' does not exist"
            )));
        }
        Ok(())
    }

    async fn get_resource_policy(&self, resource: &str) -> AppResult<ResourcePolicy> {
        let state = self.state.read().await;
        let policy = state.policies.get(resource).ok_or_else(|| {
            AppError::NotFound(format!("resource '{resource}' does not exist"))
        })?;
        Ok(ResourcePolicy {
            etag: policy.etag(),
            bindings: policy.bindings.clone(),
        })
    }

    async fn set_resource_policy(&self, resource: &str, policy: ResourcePolicy) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.set_policy_conflicts > 0 {
            state.set_policy_conflicts -= 1;
            // A concurrent writer moved the policy underneath the caller.
            if let Some(stored) = state.policies.get_mut(resource) {
                stored.etag_counter += 1;
            }
            return Err(AppError::Conflict("policy etag conflict injected".to_owned()));
        }

        let stored = state.policies.get_mut(resource).ok_or_else(|| {
            AppError::NotFound(format!("resource '{resource}' does not exist"))
        })?;
        if stored.etag() != policy.etag {
            return Err(AppError::Conflict(format!(
                "stale policy etag '{}' for resource '{resource}'",
                policy.etag
            )));
        }

        stored.bindings = policy.bindings;
        stored.etag_counter += 1;
        Ok(())
    }

    async fn create_service_account_key(
        &self,
        account: &ServiceAccountRef,
    ) -> AppResult<ServiceAccountKeyMaterial> {
        let key_name = format!(
            "{}/keys/{}",
            account.resource_name(),
            Uuid::new_v4().simple()
        );
        self.state.write().await.keys.insert(key_name.clone());
        Ok(ServiceAccountKeyMaterial {
            key_name,
            private_key_data: format!("cHJpdmF0ZS1rZXkt{}", Uuid::new_v4().simple()),
            key_algorithm: KEY_ALGORITHM_RSA_2048.to_owned(),
            key_type: KEY_TYPE_GOOGLE_CREDENTIALS_FILE.to_owned(),
        })
    }

    async fn service_account_key_exists(&self, key_name: &str) -> AppResult<bool> {
        Ok(self.state.read().await.keys.contains(key_name))
    }

    async fn delete_service_account_key(&self, key_name: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.key_deletion_outages > 0 {
            state.key_deletion_outages -= 1;
            return Err(AppError::TransientRemote(
                "key deletion outage injected".to_owned(),
            ));
        }

        if !state.keys.remove(key_name) {
            return Err(AppError::NotFound(format!(
                "key '{key_name}' does not exist"
            )));
        }
        Ok(())
    }

    async fn mint_access_token(
        &self,
        _account: &ServiceAccountRef,
        _scopes: &[String],
    ) -> AppResult<AccessTokenMaterial> {
        let state = self.state.read().await;
        Ok(AccessTokenMaterial {
            token: format!("ya29.{}", Uuid::new_v4().simple()),
            expires_at: Utc::now() + Duration::seconds(state.token_lifetime_seconds),
        })
    }
}

/// In-memory recovery log that also counts everything ever recorded.
pub struct FakeRecoveryLog {
    entries: RwLock<Vec<PendingOperation>>,
    recorded_total: RwLock<usize>,
}

impl FakeRecoveryLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            recorded_total: RwLock::new(0),
        }
    }

    pub async fn open_entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn recorded_entry_count(&self) -> usize {
        *self.recorded_total.read().await
    }
}

#[async_trait]
impl RecoveryLogRepository for FakeRecoveryLog {
    async fn record(&self, operation: PendingOperation) -> AppResult<()> {
        self.entries.write().await.push(operation);
        *self.recorded_total.write().await += 1;
        Ok(())
    }

    async fn clear(&self, op_id: Uuid) -> AppResult<()> {
        self.entries
            .write()
            .await
            .retain(|operation| operation.op_id() != op_id);
        Ok(())
    }

    async fn list_recorded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<PendingOperation>> {
        let mut stale: Vec<PendingOperation> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|operation| operation.recorded_at() < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(PendingOperation::recorded_at);
        Ok(stale)
    }
}

/// In-memory role-set store with version compare-and-swap.
pub struct FakeRoleSetRepository {
    records: RwLock<HashMap<RoleSetName, RoleSet>>,
}

impl FakeRoleSetRepository {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RoleSetRepository for FakeRoleSetRepository {
    async fn insert(&self, role_set: RoleSet) -> AppResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(role_set.name()) {
            return Err(AppError::Conflict(format!(
                "role set '{}' already exists",
                role_set.name()
            )));
        }
        records.insert(role_set.name().clone(), role_set);
        Ok(())
    }

    async fn find(&self, name: &RoleSetName) -> AppResult<Option<RoleSet>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn update(&self, role_set: RoleSet, expected_version: u64) -> AppResult<()> {
        let mut records = self.records.write().await;
        let stored = records.get(role_set.name()).ok_or_else(|| {
            AppError::NotFound(format!("role set '{}' does not exist", role_set.name()))
        })?;

        if stored.version() != expected_version {
            return Err(AppError::Conflict(format!(
                "role set '{}' moved from version {expected_version} to {}",
                role_set.name(),
                stored.version()
            )));
        }

        records.insert(role_set.name().clone(), role_set);
        Ok(())
    }

    async fn delete(&self, name: &RoleSetName) -> AppResult<()> {
        if self.records.write().await.remove(name).is_none() {
            return Err(AppError::NotFound(format!(
                "role set '{name}' does not exist"
            )));
        }
        Ok(())
    }

    async fn list_names(&self) -> AppResult<Vec<RoleSetName>> {
        let mut names: Vec<RoleSetName> = self.records.read().await.keys().cloned().collect();
        names.sort_by(|left, right| left.as_str().cmp(right.as_str()));
        Ok(names)
    }
}
