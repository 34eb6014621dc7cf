use std::str::FromStr;

use credmint_core::{AppError, AppResult, ProjectId, RoleSetName};
use serde::{Deserialize, Serialize};

use crate::{ResourceBindings, ServiceAccountRef};

/// Kind of secret a role set issues. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// Short-lived OAuth access token. Non-renewable, non-revocable.
    AccessToken,
    /// Service-account key with a renewable, revocable lease.
    ServiceAccountKey,
}

impl SecretKind {
    /// Returns a stable storage value for the secret kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::ServiceAccountKey => "service_account_key",
        }
    }
}

impl FromStr for SecretKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "access_token" => Ok(Self::AccessToken),
            "service_account_key" => Ok(Self::ServiceAccountKey),
            _ => Err(AppError::Validation(format!(
                "unknown secret kind '{value}', expected 'access_token' or 'service_account_key'"
            ))),
        }
    }
}

/// A named, reusable identity-plus-permissions bundle.
///
/// The role set exclusively owns one remote service account; deleting the
/// role set deletes the account. `version` increases on every binding or
/// scope update and backs optimistic-concurrency checks in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet {
    name: RoleSetName,
    project: ProjectId,
    secret_kind: SecretKind,
    account: ServiceAccountRef,
    bindings: ResourceBindings,
    token_scopes: Vec<String>,
    version: u64,
}

impl RoleSet {
    /// Creates a new role set at version 1, validating kind-specific fields.
    pub fn new(
        name: RoleSetName,
        project: ProjectId,
        secret_kind: SecretKind,
        account: ServiceAccountRef,
        bindings: ResourceBindings,
        token_scopes: Vec<String>,
    ) -> AppResult<Self> {
        validate_kind_fields(name.as_str(), secret_kind, &token_scopes)?;

        if bindings.is_empty() {
            return Err(AppError::Validation(format!(
                "role set '{name}' must bind at least one resource"
            )));
        }

        Ok(Self {
            name,
            project,
            secret_kind,
            account,
            bindings,
            token_scopes: normalize_scopes(token_scopes),
            version: 1,
        })
    }

    /// Reconstructs a stored role set, re-running the same validation as
    /// creation so corrupt rows surface as errors instead of bad state.
    pub fn from_stored(
        name: RoleSetName,
        project: ProjectId,
        secret_kind: SecretKind,
        account: ServiceAccountRef,
        bindings: ResourceBindings,
        token_scopes: Vec<String>,
        version: u64,
    ) -> AppResult<Self> {
        let mut role_set = Self::new(name, project, secret_kind, account, bindings, token_scopes)?;
        role_set.version = version.max(1);
        Ok(role_set)
    }

    /// Returns the immutable role-set name.
    #[must_use]
    pub fn name(&self) -> &RoleSetName {
        &self.name
    }

    /// Returns the project the owned service account lives in.
    #[must_use]
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Returns the fixed secret kind.
    #[must_use]
    pub fn secret_kind(&self) -> SecretKind {
        self.secret_kind
    }

    /// Returns the owned service-account reference.
    #[must_use]
    pub fn account(&self) -> &ServiceAccountRef {
        &self.account
    }

    /// Returns the current binding spec.
    #[must_use]
    pub fn bindings(&self) -> &ResourceBindings {
        &self.bindings
    }

    /// Returns the OAuth scopes used for access-token issuance.
    #[must_use]
    pub fn token_scopes(&self) -> &[String] {
        self.token_scopes.as_slice()
    }

    /// Returns the monotonic update counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Produces the next version of this role set with updated bindings
    /// and/or scopes.
    ///
    /// The returned value carries `version + 1`; the caller persists it with
    /// a compare-and-swap against the starting version.
    pub fn with_update(
        &self,
        new_bindings: Option<ResourceBindings>,
        new_token_scopes: Option<Vec<String>>,
    ) -> AppResult<Self> {
        let bindings = new_bindings.unwrap_or_else(|| self.bindings.clone());
        let token_scopes = new_token_scopes.unwrap_or_else(|| self.token_scopes.clone());

        validate_kind_fields(self.name.as_str(), self.secret_kind, &token_scopes)?;

        if bindings.is_empty() {
            return Err(AppError::Validation(format!(
                "role set '{}' must bind at least one resource",
                self.name
            )));
        }

        Ok(Self {
            name: self.name.clone(),
            project: self.project.clone(),
            secret_kind: self.secret_kind,
            account: self.account.clone(),
            bindings,
            token_scopes: normalize_scopes(token_scopes),
            version: self.version.saturating_add(1),
        })
    }
}

fn validate_kind_fields(name: &str, kind: SecretKind, token_scopes: &[String]) -> AppResult<()> {
    match kind {
        SecretKind::AccessToken => {
            if token_scopes.is_empty() {
                return Err(AppError::Validation(format!(
                    "role set '{name}' issues access tokens and requires token_scopes"
                )));
            }
            if token_scopes.iter().any(|scope| scope.trim().is_empty()) {
                return Err(AppError::Validation(format!(
                    "role set '{name}' token_scopes must not contain blank entries"
                )));
            }
        }
        SecretKind::ServiceAccountKey => {
            if !token_scopes.is_empty() {
                return Err(AppError::Validation(format!(
                    "role set '{name}' issues keys and must not set token_scopes"
                )));
            }
        }
    }

    Ok(())
}

fn normalize_scopes(token_scopes: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(token_scopes.len());
    for scope in token_scopes {
        if !seen.contains(&scope) {
            seen.push(scope);
        }
    }
    seen
}
