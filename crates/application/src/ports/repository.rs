use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credmint_core::{AppResult, RoleSetName};
use credmint_domain::{PendingOperation, RoleSet};
use uuid::Uuid;

/// Persistence port for role-set records.
///
/// One stored record per role set, keyed by name. Updates go through a
/// compare-and-swap on the version counter so concurrent editors cannot
/// lose each other's writes.
#[async_trait]
pub trait RoleSetRepository: Send + Sync {
    /// Stores a new role set. Fails with `Conflict` when the name exists.
    async fn insert(&self, role_set: RoleSet) -> AppResult<()>;

    /// Returns the stored role set, if any.
    async fn find(&self, name: &RoleSetName) -> AppResult<Option<RoleSet>>;

    /// Replaces a stored role set only when the stored version still equals
    /// `expected_version`. Fails with `Conflict` when a concurrent writer
    /// moved the version, `NotFound` when the record is gone.
    async fn update(&self, role_set: RoleSet, expected_version: u64) -> AppResult<()>;

    /// Removes a stored role set. Fails with `NotFound` when absent.
    async fn delete(&self, name: &RoleSetName) -> AppResult<()>;

    /// Lists every stored role-set name in order.
    async fn list_names(&self) -> AppResult<Vec<RoleSetName>>;
}

/// Persistence port for recovery-log entries.
///
/// One stored entry per in-flight multi-step remote mutation, keyed by
/// operation id.
#[async_trait]
pub trait RecoveryLogRepository: Send + Sync {
    /// Persists a pending operation before its remote call is attempted.
    async fn record(&self, operation: PendingOperation) -> AppResult<()>;

    /// Removes a pending operation after confirmed remote success.
    /// Clearing an already-cleared entry succeeds.
    async fn clear(&self, op_id: Uuid) -> AppResult<()>;

    /// Returns all entries recorded strictly before `cutoff`, oldest first.
    async fn list_recorded_before(&self, cutoff: DateTime<Utc>)
    -> AppResult<Vec<PendingOperation>>;
}
