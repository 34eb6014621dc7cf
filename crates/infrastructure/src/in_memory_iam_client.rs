use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use credmint_application::{
    AccessTokenMaterial, IamClient, PolicyBinding, ResourcePolicy, ServiceAccountKeyMaterial,
};
use credmint_core::{AppError, AppResult, ProjectId};
use credmint_domain::{
    ServiceAccountRef, KEY_ALGORITHM_RSA_2048, KEY_TYPE_GOOGLE_CREDENTIALS_FILE,
};
use tokio::sync::RwLock;
use uuid::Uuid;

const IN_MEMORY_TOKEN_LIFETIME_SECONDS: i64 = 3600;

#[derive(Default)]
struct StoredPolicy {
    etag_counter: u64,
    bindings: Vec<PolicyBinding>,
}

impl StoredPolicy {
    fn etag(&self) -> String {
        format!("etag-{}", self.etag_counter)
    }
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, ServiceAccountRef>,
    policies: HashMap<String, StoredPolicy>,
    keys: HashSet<String>,
}

/// In-memory IAM emulator for credential-free local development.
///
/// Policies auto-create on first access, etags move on every write, and key
/// material is synthesized locally. Nothing issued here grants any real
/// access.
#[derive(Default)]
pub struct InMemoryIamClient {
    state: RwLock<State>,
}

impl InMemoryIamClient {
    /// Creates an empty emulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IamClient for InMemoryIamClient {
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
        if self
            .state
            .write()
            .await
            .accounts
            .remove(resource_name)
            .is_none()
        {
            return Err(AppError::NotFound(format!(
                "service account '{resource_name}' does not exist"
            )));
        }
        Ok(())
    }

    async fn get_resource_policy(&self, resource: &str) -> AppResult<ResourcePolicy> {
        let mut state = self.state.write().await;
        let stored = state.policies.entry(resource.to_owned()).or_default();
        Ok(ResourcePolicy {
            etag: stored.etag(),
            bindings: stored.bindings.clone(),
        })
    }

    async fn set_resource_policy(&self, resource: &str, policy: ResourcePolicy) -> AppResult<()> {
        let mut state = self.state.write().await;
        let stored = state.policies.entry(resource.to_owned()).or_default();

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
            private_key_data: format!("bG9jYWwta2V5LQ{}", Uuid::new_v4().simple()),
            key_algorithm: KEY_ALGORITHM_RSA_2048.to_owned(),
            key_type: KEY_TYPE_GOOGLE_CREDENTIALS_FILE.to_owned(),
        })
    }

    async fn service_account_key_exists(&self, key_name: &str) -> AppResult<bool> {
        Ok(self.state.read().await.keys.contains(key_name))
    }

    async fn delete_service_account_key(&self, key_name: &str) -> AppResult<()> {
        if !self.state.write().await.keys.remove(key_name) {
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
        Ok(AccessTokenMaterial {
            token: format!("local.{}", Uuid::new_v4().simple()),
            expires_at: Utc::now() + Duration::seconds(IN_MEMORY_TOKEN_LIFETIME_SECONDS),
        })
    }
}
