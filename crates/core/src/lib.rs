//! Shared primitives for all Rust crates in Credmint.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across Credmint crates.
pub type AppResult<T> = Result<T, AppError>;

/// Unique, immutable name of a role set.
///
/// Role-set names double as storage keys and as the stable part of derived
/// service-account ids, so the character set is kept deliberately narrow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleSetName(String);

impl RoleSetName {
    /// Maximum accepted role-set name length.
    pub const MAX_LENGTH: usize = 64;

    /// Creates a validated role-set name.
    ///
    /// Accepts lowercase ASCII alphanumerics plus `-` and `_`, up to
    /// [`Self::MAX_LENGTH`] characters.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "role set name must not be empty".to_owned(),
            ));
        }

        if trimmed.len() > Self::MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "role set name must not exceed {} characters",
                Self::MAX_LENGTH
            )));
        }

        if !trimmed
            .chars()
            .all(|character| character.is_ascii_lowercase() || character.is_ascii_digit() || character == '-' || character == '_')
        {
            return Err(AppError::Validation(format!(
                "role set name '{trimmed}' may only contain lowercase letters, digits, '-' and '_'"
            )));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for RoleSetName {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<RoleSetName> for String {
    fn from(value: RoleSetName) -> Self {
        value.0
    }
}

/// Google Cloud project identifier a role set's service account lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a validated project identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "project id must not be empty".to_owned(),
            ));
        }

        if trimmed.contains(char::is_whitespace) {
            return Err(AppError::Validation(format!(
                "project id '{trimmed}' must not contain whitespace"
            )));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ProjectId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant. The caller must fix the request.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested role set, secret or remote object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is incompatible with the role set's fixed secret kind.
    #[error("wrong secret kind: {0}")]
    WrongSecretType(String),

    /// Optimistic-concurrency loss on a policy etag or role-set version.
    /// Retryable after a fresh read.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Remote identity or binding setup failed after exhausting retries and
    /// the operation was rolled back.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Transient remote failure (network, rate limit). Retried internally
    /// with backoff; surfaced only once the retry budget is spent.
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    /// Permanent remote failure (permission denied, quota). Never retried.
    #[error("permanent remote error: {0}")]
    PermanentRemote(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns whether the caller may usefully retry the failed call.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::TransientRemote(_) | Self::Provisioning(_)
        )
    }
}
