use credmint_application::{CredentialService, LeaseService, RoleSetService};
use credmint_domain::LeaseConfig;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Role-set lifecycle service.
    pub role_set_service: RoleSetService,
    /// Credential issuance service.
    pub credential_service: CredentialService,
    /// Lease renew/revoke service.
    pub lease_service: LeaseService,
    /// Operator-configured lease bounds.
    pub lease_config: LeaseConfig,
}
