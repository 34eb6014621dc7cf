use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use credmint_core::{AppError, RoleSetName};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ServiceAccountRef;

/// Kind of in-flight multi-step remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOperationKind {
    /// A service account is being created for a new role set.
    CreateServiceAccount,
    /// Role grants are being applied on one resource.
    ApplyBindings,
    /// Role grants are being removed from one resource.
    RemoveBindings,
    /// A role set's service account is being deleted.
    DeleteServiceAccount,
}

impl PendingOperationKind {
    /// Returns a stable storage value for the operation kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateServiceAccount => "create_service_account",
            Self::ApplyBindings => "apply_bindings",
            Self::RemoveBindings => "remove_bindings",
            Self::DeleteServiceAccount => "delete_service_account",
        }
    }
}

impl FromStr for PendingOperationKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create_service_account" => Ok(Self::CreateServiceAccount),
            "apply_bindings" => Ok(Self::ApplyBindings),
            "remove_bindings" => Ok(Self::RemoveBindings),
            "delete_service_account" => Ok(Self::DeleteServiceAccount),
            _ => Err(AppError::Validation(format!(
                "unknown pending operation kind '{value}'"
            ))),
        }
    }
}

/// Durable record of one in-flight remote mutation.
///
/// Written strictly before the remote call and cleared only after confirmed
/// success, so a crash mid-operation leaves a discoverable, resumable trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    op_id: Uuid,
    kind: PendingOperationKind,
    role_set: RoleSetName,
    account: ServiceAccountRef,
    resource: Option<String>,
    roles: BTreeSet<String>,
    recorded_at: DateTime<Utc>,
}

impl PendingOperation {
    /// Records a new pending operation with a fresh id and timestamp.
    #[must_use]
    pub fn new(
        kind: PendingOperationKind,
        role_set: RoleSetName,
        account: ServiceAccountRef,
        resource: Option<String>,
        roles: BTreeSet<String>,
    ) -> Self {
        Self {
            op_id: Uuid::new_v4(),
            kind,
            role_set,
            account,
            resource,
            roles,
            recorded_at: Utc::now(),
        }
    }

    /// Reconstructs a stored pending operation.
    #[must_use]
    pub fn from_stored(
        op_id: Uuid,
        kind: PendingOperationKind,
        role_set: RoleSetName,
        account: ServiceAccountRef,
        resource: Option<String>,
        roles: BTreeSet<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            op_id,
            kind,
            role_set,
            account,
            resource,
            roles,
            recorded_at,
        }
    }

    /// Returns the unique operation id.
    #[must_use]
    pub fn op_id(&self) -> Uuid {
        self.op_id
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> PendingOperationKind {
        self.kind
    }

    /// Returns the role set this operation belongs to.
    #[must_use]
    pub fn role_set(&self) -> &RoleSetName {
        &self.role_set
    }

    /// Returns the service account the operation targets.
    #[must_use]
    pub fn account(&self) -> &ServiceAccountRef {
        &self.account
    }

    /// Returns the bound resource for binding operations.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Returns the managed roles for binding operations.
    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Returns when the operation was recorded.
    #[must_use]
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}
