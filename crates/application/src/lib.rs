//! Application services and ports.

#![forbid(unsafe_code)]

mod binding_reconciler;
mod credential_service;
#[cfg(test)]
mod end_to_end;
mod lease_service;
mod ports;
mod recovery_sweeper;
mod role_set_service;
#[cfg(test)]
mod test_support;

pub use binding_reconciler::BindingReconciler;
pub use credential_service::CredentialService;
pub use lease_service::LeaseService;
pub use ports::{
    AccessTokenMaterial, CreateRoleSetInput, IamClient, PolicyBinding, RecoveryLogRepository,
    ResourcePolicy, RoleSetRepository, ServiceAccountKeyMaterial, SweepCoordinator, SweepLease,
    UpdateRoleSetInput,
};
pub use recovery_sweeper::{RecoverySweeper, SweepReport};
pub use role_set_service::RoleSetService;
