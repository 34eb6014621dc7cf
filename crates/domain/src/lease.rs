use chrono::{DateTime, Duration, Utc};
use credmint_core::{AppError, AppResult, RoleSetName};

/// Key algorithm requested for generated service-account keys.
pub const KEY_ALGORITHM_RSA_2048: &str = "KEY_ALG_RSA_2048";

/// Private-key encoding of generated service-account keys.
pub const KEY_TYPE_GOOGLE_CREDENTIALS_FILE: &str = "TYPE_GOOGLE_CREDENTIALS_FILE";

/// Operator-supplied lease bounds.
///
/// Passed into issuance and lease handling at call time so concurrent
/// operations under different configurations stay deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    default_ttl: Duration,
    max_ttl: Duration,
}

impl LeaseConfig {
    /// Creates a validated lease configuration.
    pub fn new(default_ttl: Duration, max_ttl: Duration) -> AppResult<Self> {
        if default_ttl <= Duration::zero() {
            return Err(AppError::Validation(
                "default lease TTL must be greater than zero".to_owned(),
            ));
        }

        if max_ttl < default_ttl {
            return Err(AppError::Validation(
                "max lease TTL must not be smaller than the default TTL".to_owned(),
            ));
        }

        Ok(Self {
            default_ttl,
            max_ttl,
        })
    }

    /// Creates a lease configuration from whole seconds.
    pub fn from_seconds(default_ttl_seconds: i64, max_ttl_seconds: i64) -> AppResult<Self> {
        Self::new(
            Duration::seconds(default_ttl_seconds),
            Duration::seconds(max_ttl_seconds),
        )
    }

    /// Returns the default lease TTL.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the maximum lease TTL.
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Returns the effective TTL for a new key lease.
    ///
    /// A requested override wins over the default but is always capped at
    /// the maximum.
    #[must_use]
    pub fn effective_key_ttl(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default_ttl).min(self.max_ttl)
    }

    /// Returns the TTL a token response may carry at most.
    ///
    /// Tokens cannot be renewed, so there is deliberately no max-TTL
    /// override path: the default TTL is the sole bound.
    #[must_use]
    pub fn cap_token_ttl(&self, remote_ttl: Duration) -> Duration {
        remote_ttl.min(self.default_ttl)
    }
}

/// Lease attached to an issued service-account key.
///
/// Never persisted server-side; the host lease scheduler holds it and hands
/// it back on renew/revoke callbacks. `key_name` is the internal reference
/// used to delete the remote key on revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLease {
    role_set: RoleSetName,
    key_name: String,
    issued_at: DateTime<Utc>,
    ttl: Duration,
    max_ttl: Duration,
}

impl KeyLease {
    /// Creates a lease for a freshly issued key.
    pub fn new(
        role_set: RoleSetName,
        key_name: impl Into<String>,
        issued_at: DateTime<Utc>,
        ttl: Duration,
        max_ttl: Duration,
    ) -> AppResult<Self> {
        let key_name = key_name.into();
        if key_name.trim().is_empty() {
            return Err(AppError::Validation(
                "key lease must reference a remote key name".to_owned(),
            ));
        }

        if ttl <= Duration::zero() || ttl > max_ttl {
            return Err(AppError::Validation(format!(
                "key lease TTL must be positive and at most the max TTL of {}s",
                max_ttl.num_seconds()
            )));
        }

        Ok(Self {
            role_set,
            key_name,
            issued_at,
            ttl,
            max_ttl,
        })
    }

    /// Returns the owning role-set name.
    #[must_use]
    pub fn role_set(&self) -> &RoleSetName {
        &self.role_set
    }

    /// Returns the remote key resource name.
    #[must_use]
    pub fn key_name(&self) -> &str {
        self.key_name.as_str()
    }

    /// Returns the issuance instant.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Returns the current TTL measured from issuance.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the maximum lease duration measured from issuance.
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Returns the current expiry instant.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + self.ttl
    }

    /// Keys are always renewable; tokens never reach this type.
    #[must_use]
    pub fn renewable(&self) -> bool {
        true
    }

    /// Computes the renewed lease after extending by `increment` at `now`.
    ///
    /// The new expiry is `issued_at + min(elapsed + increment, max_ttl)`.
    /// Fails when the cap would leave the lease with no remaining validity
    /// instead of silently clamping to zero.
    pub fn renewed(&self, now: DateTime<Utc>, increment: Duration) -> AppResult<Self> {
        if increment <= Duration::zero() {
            return Err(AppError::Validation(
                "lease renewal increment must be greater than zero".to_owned(),
            ));
        }

        let elapsed = now - self.issued_at;
        let total = (elapsed + increment).min(self.max_ttl);

        if total <= elapsed {
            return Err(AppError::Validation(format!(
                "lease for key '{}' has exhausted its max TTL of {}s",
                self.key_name,
                self.max_ttl.num_seconds()
            )));
        }

        Ok(Self {
            role_set: self.role_set.clone(),
            key_name: self.key_name.clone(),
            issued_at: self.issued_at,
            ttl: total,
            max_ttl: self.max_ttl,
        })
    }
}

/// An issued OAuth access token.
///
/// Exists only as a capability: no server-side record survives issuance, so
/// revocation is a no-op and safety relies on the short TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    token: String,
    expires_at: DateTime<Utc>,
    ttl: Duration,
}

impl IssuedToken {
    /// Creates an issued-token capability.
    pub fn new(
        token: impl Into<String>,
        expires_at: DateTime<Utc>,
        ttl: Duration,
    ) -> AppResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AppError::Validation(
                "issued token material must not be empty".to_owned(),
            ));
        }

        if ttl <= Duration::zero() {
            return Err(AppError::Validation(
                "issued token TTL must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            token,
            expires_at,
            ttl,
        })
    }

    /// Returns the bearer token string.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Returns the remote expiry instant.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the capped TTL reported to the caller.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// An issued service-account key plus its lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedKey {
    private_key_data: String,
    key_algorithm: String,
    key_type: String,
    lease: KeyLease,
}

impl IssuedKey {
    /// Creates an issued key from remote key material and its lease.
    pub fn new(
        private_key_data: impl Into<String>,
        key_algorithm: impl Into<String>,
        key_type: impl Into<String>,
        lease: KeyLease,
    ) -> AppResult<Self> {
        let private_key_data = private_key_data.into();
        if private_key_data.trim().is_empty() {
            return Err(AppError::Validation(
                "issued key material must not be empty".to_owned(),
            ));
        }

        Ok(Self {
            private_key_data,
            key_algorithm: key_algorithm.into(),
            key_type: key_type.into(),
            lease,
        })
    }

    /// Returns the base64-encoded private key data. Returned once; never
    /// persisted.
    #[must_use]
    pub fn private_key_data(&self) -> &str {
        self.private_key_data.as_str()
    }

    /// Returns the key algorithm identifier.
    #[must_use]
    pub fn key_algorithm(&self) -> &str {
        self.key_algorithm.as_str()
    }

    /// Returns the private-key encoding identifier.
    #[must_use]
    pub fn key_type(&self) -> &str {
        self.key_type.as_str()
    }

    /// Returns the attached lease.
    #[must_use]
    pub fn lease(&self) -> &KeyLease {
        &self.lease
    }
}
