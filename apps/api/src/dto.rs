//! Request and response payloads for the HTTP surface.

use chrono::{DateTime, Duration, Utc};
use credmint_core::{AppError, AppResult, RoleSetName};
use credmint_domain::{IssuedKey, IssuedToken, KeyLease, RoleSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role-set creation request. The role-set name comes from the path.
#[derive(Debug, Deserialize)]
pub struct CreateRoleSetRequest {
    /// Project the owned service account is created in.
    pub project: String,
    /// Secret kind: `access_token` or `service_account_key`.
    pub secret_kind: String,
    /// Binding spec: resource name to role-name array.
    pub bindings: Value,
    /// OAuth scopes for token role sets.
    #[serde(default)]
    pub token_scopes: Vec<String>,
}

/// Role-set update request. Absent fields keep their stored value.
#[derive(Debug, Deserialize)]
pub struct UpdateRoleSetRequest {
    /// Replacement binding spec.
    pub bindings: Option<Value>,
    /// Replacement OAuth scopes.
    pub token_scopes: Option<Vec<String>>,
}

/// Stored role-set view.
#[derive(Debug, Serialize)]
pub struct RoleSetResponse {
    /// Role-set name.
    pub name: String,
    /// Owning project.
    pub project: String,
    /// Secret kind in storage form.
    pub secret_kind: String,
    /// Email of the owned service account.
    pub service_account_email: String,
    /// Current binding spec.
    pub bindings: Value,
    /// OAuth scopes for token role sets.
    pub token_scopes: Vec<String>,
    /// Monotonic update counter.
    pub version: u64,
}

impl RoleSetResponse {
    /// Builds the response view of one stored role set.
    pub fn from_role_set(role_set: &RoleSet) -> AppResult<Self> {
        let bindings = serde_json::to_value(role_set.bindings()).map_err(|error| {
            AppError::Internal(format!("failed to render bindings: {error}"))
        })?;

        Ok(Self {
            name: role_set.name().to_string(),
            project: role_set.project().to_string(),
            secret_kind: role_set.secret_kind().as_str().to_owned(),
            service_account_email: role_set.account().email().to_owned(),
            bindings,
            token_scopes: role_set.token_scopes().to_vec(),
            version: role_set.version(),
        })
    }
}

/// Role-set listing.
#[derive(Debug, Serialize)]
pub struct RoleSetListResponse {
    /// Stored role-set names in order.
    pub role_sets: Vec<String>,
}

/// Issued access token.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    /// Bearer token string.
    pub token: String,
    /// Remote expiry as a Unix timestamp.
    pub expires_at_seconds: i64,
    /// Capped TTL in seconds.
    pub token_ttl: i64,
}

impl TokenResponse {
    /// Builds the response view of an issued token.
    #[must_use]
    pub fn from_issued(issued: &IssuedToken) -> Self {
        Self {
            token: issued.token().to_owned(),
            expires_at_seconds: issued.expires_at().timestamp(),
            token_ttl: issued.ttl().num_seconds(),
        }
    }
}

/// Lease attached to an issued key, echoed back on renew and revoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeasePayload {
    /// Owning role-set name.
    pub role_set: String,
    /// Remote key resource name.
    pub key_name: String,
    /// Issuance instant.
    pub issued_at: DateTime<Utc>,
    /// Current TTL in seconds.
    pub ttl_seconds: i64,
    /// Maximum lease duration in seconds, measured from issuance.
    pub max_ttl_seconds: i64,
    /// Whether the lease can be renewed.
    pub renewable: bool,
}

impl LeasePayload {
    /// Builds the wire form of a key lease.
    #[must_use]
    pub fn from_lease(lease: &KeyLease) -> Self {
        Self {
            role_set: lease.role_set().to_string(),
            key_name: lease.key_name().to_owned(),
            issued_at: lease.issued_at(),
            ttl_seconds: lease.ttl().num_seconds(),
            max_ttl_seconds: lease.max_ttl().num_seconds(),
            renewable: lease.renewable(),
        }
    }

    /// Reconstructs the domain lease this payload describes.
    pub fn into_lease(self) -> AppResult<KeyLease> {
        let ttl = duration_from_seconds(self.ttl_seconds, "ttl_seconds")?;
        let max_ttl = duration_from_seconds(self.max_ttl_seconds, "max_ttl_seconds")?;

        KeyLease::new(
            RoleSetName::new(self.role_set)?,
            self.key_name,
            self.issued_at,
            ttl,
            max_ttl,
        )
    }
}

/// Converts caller-supplied seconds into a duration, rejecting values
/// outside chrono's representable range instead of panicking on them.
pub fn duration_from_seconds(seconds: i64, field: &str) -> AppResult<Duration> {
    Duration::try_seconds(seconds).ok_or_else(|| {
        AppError::Validation(format!("{field} value {seconds} is out of range"))
    })
}

/// Issued service-account key.
#[derive(Debug, Serialize)]
pub struct KeyResponse {
    /// Base64-encoded private key data. Returned exactly once.
    pub private_key_data: String,
    /// Key algorithm identifier.
    pub key_algorithm: String,
    /// Private-key encoding identifier.
    pub key_type: String,
    /// Attached lease.
    pub lease: LeasePayload,
}

impl KeyResponse {
    /// Builds the response view of an issued key.
    #[must_use]
    pub fn from_issued(issued: &IssuedKey) -> Self {
        Self {
            private_key_data: issued.private_key_data().to_owned(),
            key_algorithm: issued.key_algorithm().to_owned(),
            key_type: issued.key_type().to_owned(),
            lease: LeasePayload::from_lease(issued.lease()),
        }
    }
}

/// Key issuance request body. Also accepted as a query parameter on GET.
#[derive(Debug, Default, Deserialize)]
pub struct KeyRequest {
    /// Requested TTL override in seconds.
    pub ttl_seconds: Option<i64>,
}

/// Lease renewal request.
#[derive(Debug, Deserialize)]
pub struct RenewLeaseRequest {
    /// Secret kind the lease belongs to.
    pub secret_kind: String,
    /// The lease being renewed; required for key leases.
    pub lease: Option<LeasePayload>,
    /// Requested extension in seconds.
    pub increment_seconds: i64,
}

/// Lease revocation request.
#[derive(Debug, Deserialize)]
pub struct RevokeLeaseRequest {
    /// Secret kind the lease belongs to.
    pub secret_kind: String,
    /// The lease being revoked; required for key leases.
    pub lease: Option<LeasePayload>,
}

/// Lease renewal result.
#[derive(Debug, Serialize)]
pub struct RenewLeaseResponse {
    /// The lease with its extended TTL.
    pub lease: LeasePayload,
}

/// Health probe response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Fixed status marker.
    pub status: &'static str,
}
