use credmint_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Exclusive-ownership reference to the remote service account a role set
/// owns.
///
/// The role-set record is the sole source of truth for this relationship;
/// the remote account carries no back-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    resource_name: String,
    email: String,
}

impl ServiceAccountRef {
    /// Creates a validated service-account reference.
    pub fn new(resource_name: impl Into<String>, email: impl Into<String>) -> AppResult<Self> {
        let resource_name = resource_name.into();
        let email = email.into();

        if resource_name.trim().is_empty() {
            return Err(AppError::Validation(
                "service account resource name must not be empty".to_owned(),
            ));
        }

        if !email.contains('@') {
            return Err(AppError::Validation(format!(
                "service account email '{email}' is not an email address"
            )));
        }

        Ok(Self {
            resource_name,
            email,
        })
    }

    /// Returns the full remote resource name
    /// (`projects/{project}/serviceAccounts/{email}`).
    #[must_use]
    pub fn resource_name(&self) -> &str {
        self.resource_name.as_str()
    }

    /// Returns the service-account email address.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Returns the IAM policy member string for this account.
    #[must_use]
    pub fn member(&self) -> String {
        format!("serviceAccount:{}", self.email)
    }
}
