use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credmint_core::{AppResult, ProjectId};
use credmint_domain::ServiceAccountRef;

/// One role-to-members grant inside a resource policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyBinding {
    /// Granted role name.
    pub role: String,
    /// Member strings holding the role.
    pub members: BTreeSet<String>,
}

/// A resource's IAM policy together with its concurrency token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    /// Opaque optimistic-concurrency token; a write with a stale etag fails
    /// with a conflict.
    pub etag: String,
    /// Current role grants.
    pub bindings: Vec<PolicyBinding>,
}

impl ResourcePolicy {
    /// Adds `member` to `role`, returning whether the policy changed.
    ///
    /// Purely additive: existing grants for other roles or members are left
    /// untouched.
    pub fn grant(&mut self, role: &str, member: &str) -> bool {
        if let Some(binding) = self.bindings.iter_mut().find(|binding| binding.role == role) {
            return binding.members.insert(member.to_owned());
        }

        self.bindings.push(PolicyBinding {
            role: role.to_owned(),
            members: BTreeSet::from([member.to_owned()]),
        });
        true
    }

    /// Removes `member` from `role`, returning whether the policy changed.
    ///
    /// Removes exactly the one member entry; an emptied binding is dropped.
    pub fn revoke(&mut self, role: &str, member: &str) -> bool {
        let mut changed = false;
        for binding in &mut self.bindings {
            if binding.role == role {
                changed = binding.members.remove(member) || changed;
            }
        }
        self.bindings.retain(|binding| !binding.members.is_empty());
        changed
    }

    /// Returns whether `member` currently holds `role`.
    #[must_use]
    pub fn has_grant(&self, role: &str, member: &str) -> bool {
        self.bindings
            .iter()
            .any(|binding| binding.role == role && binding.members.contains(member))
    }
}

/// Key material returned once at issuance for a new service-account key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountKeyMaterial {
    /// Full remote key resource name, used later for revocation.
    pub key_name: String,
    /// Base64-encoded private key data.
    pub private_key_data: String,
    /// Key algorithm identifier.
    pub key_algorithm: String,
    /// Private-key encoding identifier.
    pub key_type: String,
}

/// A freshly minted OAuth access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTokenMaterial {
    /// Bearer token string.
    pub token: String,
    /// Remote expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Port over the remote IAM / Resource-Manager surface.
///
/// Adapters classify remote failures: rate limits and network errors become
/// `AppError::TransientRemote`, permission and quota failures become
/// `AppError::PermanentRemote`, and a stale policy etag becomes
/// `AppError::Conflict`.
#[async_trait]
pub trait IamClient: Send + Sync {
    /// Creates a service account in `project` with the given account id.
    async fn create_service_account(
        &self,
        project: &ProjectId,
        account_id: &str,
        display_name: &str,
    ) -> AppResult<ServiceAccountRef>;

    /// Looks up a service account, returning `None` when absent.
    async fn get_service_account(
        &self,
        resource_name: &str,
    ) -> AppResult<Option<ServiceAccountRef>>;

    /// Deletes a service account. An absent account fails with `NotFound`.
    async fn delete_service_account(&self, resource_name: &str) -> AppResult<()>;

    /// Fetches a resource's IAM policy with its concurrency token.
    /// An absent resource fails with `NotFound`.
    async fn get_resource_policy(&self, resource: &str) -> AppResult<ResourcePolicy>;

    /// Writes a resource's IAM policy using the fetched concurrency token.
    /// A stale token fails with `Conflict`.
    async fn set_resource_policy(&self, resource: &str, policy: ResourcePolicy) -> AppResult<()>;

    /// Creates a new key for the service account.
    async fn create_service_account_key(
        &self,
        account: &ServiceAccountRef,
    ) -> AppResult<ServiceAccountKeyMaterial>;

    /// Returns whether a service-account key still exists remotely.
    async fn service_account_key_exists(&self, key_name: &str) -> AppResult<bool>;

    /// Deletes a service-account key. An absent key fails with `NotFound`.
    async fn delete_service_account_key(&self, key_name: &str) -> AppResult<()>;

    /// Mints an OAuth access token for the account, scoped to `scopes`.
    async fn mint_access_token(
        &self,
        account: &ServiceAccountRef,
        scopes: &[String],
    ) -> AppResult<AccessTokenMaterial>;
}
