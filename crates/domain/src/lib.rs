//! Domain entities and invariants for credential issuance.

#![forbid(unsafe_code)]

mod account;
mod bindings;
mod lease;
mod recovery;
mod role_set;

pub use account::ServiceAccountRef;
pub use bindings::ResourceBindings;
pub use lease::{
    IssuedKey, IssuedToken, KEY_ALGORITHM_RSA_2048, KEY_TYPE_GOOGLE_CREDENTIALS_FILE, KeyLease,
    LeaseConfig,
};
pub use recovery::{PendingOperation, PendingOperationKind};
pub use role_set::{RoleSet, SecretKind};
