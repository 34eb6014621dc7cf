use async_trait::async_trait;
use credmint_core::AppResult;

/// A held sweep lease, released by token compare-and-delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepLease {
    /// Scope the lease guards (one per recovery-log partition).
    pub scope_key: String,
    /// Fencing token proving ownership.
    pub token: String,
    /// Identifier of the process holding the lease.
    pub holder_id: String,
}

/// Distributed coordination port keeping replicas from sweeping the
/// recovery log concurrently.
///
/// Coordination is an efficiency concern only: every sweep action is
/// idempotent, so a lost or expired lease never corrupts state.
#[async_trait]
pub trait SweepCoordinator: Send + Sync {
    /// Attempts to acquire the sweep lease for the given scope.
    async fn try_acquire(
        &self,
        scope_key: &str,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Option<SweepLease>>;

    /// Releases one lease using token compare-and-delete semantics.
    async fn release(&self, lease: &SweepLease) -> AppResult<()>;
}
