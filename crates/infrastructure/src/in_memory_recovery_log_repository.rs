use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credmint_application::RecoveryLogRepository;
use credmint_core::AppResult;
use credmint_domain::PendingOperation;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory recovery log for local development and tests.
#[derive(Default)]
pub struct InMemoryRecoveryLogRepository {
    entries: RwLock<Vec<PendingOperation>>,
}

impl InMemoryRecoveryLogRepository {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecoveryLogRepository for InMemoryRecoveryLogRepository {
    async fn record(&self, operation: PendingOperation) -> AppResult<()> {
        self.entries.write().await.push(operation);
        Ok(())
    }

    async fn clear(&self, op_id: Uuid) -> AppResult<()> {
        self.entries
            .write()
            .await
            .retain(|operation| operation.op_id() != op_id);
        Ok(())
    }

    async fn list_recorded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<PendingOperation>> {
        let mut stale: Vec<PendingOperation> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|operation| operation.recorded_at() < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(PendingOperation::recorded_at);
        Ok(stale)
    }
}
