mod coordinator;
mod iam;
mod inputs;
mod repository;

pub use coordinator::{SweepCoordinator, SweepLease};
pub use iam::{
    AccessTokenMaterial, IamClient, PolicyBinding, ResourcePolicy, ServiceAccountKeyMaterial,
};
pub use inputs::{CreateRoleSetInput, UpdateRoleSetInput};
pub use repository::{RecoveryLogRepository, RoleSetRepository};
