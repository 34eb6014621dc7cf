use std::sync::Arc;

use chrono::{Duration, Utc};
use credmint_core::{AppError, AppResult, RoleSetName};
use credmint_domain::{
    IssuedKey, IssuedToken, KeyLease, LeaseConfig, RoleSet, SecretKind,
    KEY_ALGORITHM_RSA_2048, KEY_TYPE_GOOGLE_CREDENTIALS_FILE,
};
use tracing::info;

use crate::ports::{IamClient, RoleSetRepository};

/// Issues credentials against stored role sets.
///
/// Issuance is read-only with respect to stored state: tokens leave no
/// record at all, and key leases live with the caller's lease scheduler, not
/// in storage.
#[derive(Clone)]
pub struct CredentialService {
    repository: Arc<dyn RoleSetRepository>,
    iam: Arc<dyn IamClient>,
}

impl CredentialService {
    /// Creates the service over its storage and remote ports.
    #[must_use]
    pub fn new(repository: Arc<dyn RoleSetRepository>, iam: Arc<dyn IamClient>) -> Self {
        Self { repository, iam }
    }

    /// Mints an OAuth access token through a token role set.
    ///
    /// The reported TTL is the remote expiry capped at the configured
    /// default; the expiry instant itself is always the remote one.
    pub async fn issue_token(
        &self,
        name: &RoleSetName,
        lease_config: LeaseConfig,
    ) -> AppResult<IssuedToken> {
        let role_set = self.load(name, SecretKind::AccessToken).await?;

        let material = self
            .iam
            .mint_access_token(role_set.account(), role_set.token_scopes())
            .await?;

        let remote_ttl = material.expires_at - Utc::now();
        let ttl = lease_config.cap_token_ttl(remote_ttl.max(Duration::seconds(1)));

        info!(role_set = %name, ttl_seconds = ttl.num_seconds(), "access token issued");
        IssuedToken::new(material.token, material.expires_at, ttl)
    }

    /// Generates a service-account key through a key role set, attaching a
    /// renewable lease.
    pub async fn issue_key(
        &self,
        name: &RoleSetName,
        lease_config: LeaseConfig,
        requested_ttl: Option<Duration>,
    ) -> AppResult<IssuedKey> {
        let role_set = self.load(name, SecretKind::ServiceAccountKey).await?;

        if let Some(requested) = requested_ttl
            && requested <= Duration::zero()
        {
            return Err(AppError::Validation(
                "requested key TTL must be greater than zero".to_owned(),
            ));
        }

        let material = self.iam.create_service_account_key(role_set.account()).await?;

        let ttl = lease_config.effective_key_ttl(requested_ttl);
        let lease = KeyLease::new(
            name.clone(),
            material.key_name,
            Utc::now(),
            ttl,
            lease_config.max_ttl(),
        )?;

        info!(role_set = %name, ttl_seconds = ttl.num_seconds(), "service account key issued");
        IssuedKey::new(
            material.private_key_data,
            if material.key_algorithm.is_empty() {
                KEY_ALGORITHM_RSA_2048.to_owned()
            } else {
                material.key_algorithm
            },
            if material.key_type.is_empty() {
                KEY_TYPE_GOOGLE_CREDENTIALS_FILE.to_owned()
            } else {
                material.key_type
            },
            lease,
        )
    }

    async fn load(&self, name: &RoleSetName, expected: SecretKind) -> AppResult<RoleSet> {
        let role_set = self
            .repository
            .find(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("role set '{name}' does not exist")))?;

        if role_set.secret_kind() != expected {
            return Err(AppError::WrongSecretType(format!(
                "role set '{name}' issues {} secrets, not {}",
                role_set.secret_kind().as_str(),
                expected.as_str()
            )));
        }

        Ok(role_set)
    }
}
