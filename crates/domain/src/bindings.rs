use std::collections::{BTreeMap, BTreeSet};

use credmint_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized binding spec: resource name to the set of role names granted on
/// that resource.
///
/// Set semantics throughout: duplicate roles collapse and insertion order is
/// irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceBindings(BTreeMap<String, BTreeSet<String>>);

impl ResourceBindings {
    /// Creates an empty binding spec.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Parses a human-authored binding spec.
    ///
    /// The accepted shape is a JSON object mapping each resource name to an
    /// array of role names, for example
    /// `{"//cloudresourcemanager.googleapis.com/projects/demo":
    /// ["roles/viewer"]}`.
    pub fn parse(value: &Value) -> AppResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            AppError::Validation(
                "bindings must be an object mapping resources to role lists".to_owned(),
            )
        })?;

        if object.is_empty() {
            return Err(AppError::Validation(
                "bindings must name at least one resource".to_owned(),
            ));
        }

        let mut bindings = Self::new();
        for (resource, roles_value) in object {
            let roles = roles_value.as_array().ok_or_else(|| {
                AppError::Validation(format!(
                    "roles for resource '{resource}' must be an array of role names"
                ))
            })?;

            if roles.is_empty() {
                return Err(AppError::Validation(format!(
                    "resource '{resource}' must grant at least one role"
                )));
            }

            for role_value in roles {
                let role = role_value.as_str().ok_or_else(|| {
                    AppError::Validation(format!(
                        "roles for resource '{resource}' must be strings"
                    ))
                })?;
                bindings.insert(resource, role)?;
            }
        }

        Ok(bindings)
    }

    /// Adds one role grant, validating both resource and role names.
    pub fn insert(&mut self, resource: impl Into<String>, role: impl Into<String>) -> AppResult<()> {
        let resource = resource.into();
        let role = role.into();

        if resource.trim().is_empty() {
            return Err(AppError::Validation(
                "binding resource name must not be empty".to_owned(),
            ));
        }

        validate_role_name(role.as_str())?;

        self.0.entry(resource).or_default().insert(role);
        Ok(())
    }

    /// Returns the role set granted on one resource, if any.
    #[must_use]
    pub fn roles_for(&self, resource: &str) -> Option<&BTreeSet<String>> {
        self.0.get(resource)
    }

    /// Iterates over `(resource, roles)` pairs in resource order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    /// Returns the bound resource names in order.
    #[must_use]
    pub fn resources(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }

    /// Returns whether no grants exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of bound resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.0.len()
    }

    /// Returns the grants present in `self` but absent from `previous`.
    ///
    /// Used by update reconciliation: these grants must be applied remotely.
    #[must_use]
    pub fn added_since(&self, previous: &Self) -> Self {
        let mut added = Self::new();
        for (resource, roles) in &self.0 {
            let existing = previous.0.get(resource);
            let new_roles: BTreeSet<String> = roles
                .iter()
                .filter(|role| existing.is_none_or(|known| !known.contains(*role)))
                .cloned()
                .collect();
            if !new_roles.is_empty() {
                added.0.insert(resource.clone(), new_roles);
            }
        }
        added
    }

    /// Returns the grants present in `previous` but absent from `self`.
    ///
    /// Used by update reconciliation: these grants must be removed remotely.
    #[must_use]
    pub fn removed_since(&self, previous: &Self) -> Self {
        previous.added_since(self)
    }
}

fn validate_role_name(role: &str) -> AppResult<()> {
    let is_predefined = role.starts_with("roles/") && role.len() > "roles/".len();
    let is_custom = (role.starts_with("projects/") || role.starts_with("organizations/"))
        && role.contains("/roles/");

    if !(is_predefined || is_custom) {
        return Err(AppError::Validation(format!(
            "role '{role}' must be 'roles/<name>' or a project/organization custom role"
        )));
    }

    Ok(())
}
