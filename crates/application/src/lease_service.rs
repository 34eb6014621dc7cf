use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use credmint_core::{AppError, AppResult};
use credmint_domain::KeyLease;
use tracing::info;

use crate::ports::IamClient;

/// Handles renew and revoke callbacks from the host lease scheduler.
///
/// Only key leases carry server-side obligations. Access tokens expire on
/// their own: renewing one is a caller error, revoking one is a no-op.
#[derive(Clone)]
pub struct LeaseService {
    iam: Arc<dyn IamClient>,
}

impl LeaseService {
    /// Creates the service over the remote port.
    #[must_use]
    pub fn new(iam: Arc<dyn IamClient>) -> Self {
        Self { iam }
    }

    /// Renews a key lease, returning the lease with its extended TTL.
    ///
    /// The remote key is checked first: renewing a lease whose key was
    /// deleted out-of-band fails instead of promising validity the key no
    /// longer has.
    pub async fn renew_key(
        &self,
        lease: &KeyLease,
        now: DateTime<Utc>,
        increment: Duration,
    ) -> AppResult<KeyLease> {
        if !self.iam.service_account_key_exists(lease.key_name()).await? {
            return Err(AppError::NotFound(format!(
                "key '{}' no longer exists, lease cannot be renewed",
                lease.key_name()
            )));
        }

        let renewed = lease.renewed(now, increment)?;
        info!(
            role_set = %renewed.role_set(),
            ttl_seconds = renewed.ttl().num_seconds(),
            "key lease renewed"
        );
        Ok(renewed)
    }

    /// Rejects token renewal: tokens have a fixed remote expiry.
    pub fn renew_token(&self) -> AppResult<()> {
        Err(AppError::WrongSecretType(
            "access tokens are not renewable; request a new token instead".to_owned(),
        ))
    }

    /// Revokes a key lease by deleting the remote key.
    ///
    /// An already-deleted key counts as success. Any other remote failure is
    /// reported as transient so the scheduler keeps re-attempting until the
    /// key is provably gone.
    pub async fn revoke_key(&self, lease: &KeyLease) -> AppResult<()> {
        match self.iam.delete_service_account_key(lease.key_name()).await {
            Ok(()) => {
                info!(role_set = %lease.role_set(), "key lease revoked");
                Ok(())
            }
            Err(AppError::NotFound(_)) => Ok(()),
            Err(error) => Err(AppError::TransientRemote(format!(
                "could not delete key '{}': {error}",
                lease.key_name()
            ))),
        }
    }

    /// Accepts token revocation as a no-op; the token expires on its own.
    pub fn revoke_token(&self) -> AppResult<()> {
        Ok(())
    }
}
