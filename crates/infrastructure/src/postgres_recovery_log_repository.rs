use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credmint_application::RecoveryLogRepository;
use credmint_core::{AppError, AppResult, RoleSetName};
use credmint_domain::{PendingOperation, PendingOperationKind, ServiceAccountRef};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// PostgreSQL-backed recovery log.
#[derive(Clone)]
pub struct PostgresRecoveryLogRepository {
    pool: PgPool,
}

impl PostgresRecoveryLogRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RecoveryRow {
    op_id: Uuid,
    kind: String,
    role_set: String,
    account_resource: String,
    account_email: String,
    resource: Option<String>,
    roles: Value,
    recorded_at: DateTime<Utc>,
}

impl RecoveryRow {
    fn into_operation(self) -> AppResult<PendingOperation> {
        let roles: BTreeSet<String> = serde_json::from_value(self.roles).map_err(|error| {
            AppError::Internal(format!(
                "persisted roles for operation '{}' are invalid: {error}",
                self.op_id
            ))
        })?;

        Ok(PendingOperation::from_stored(
            self.op_id,
            PendingOperationKind::from_str(self.kind.as_str())?,
            RoleSetName::new(self.role_set)?,
            ServiceAccountRef::new(self.account_resource, self.account_email)?,
            self.resource,
            roles,
            self.recorded_at,
        ))
    }
}

#[async_trait]
impl RecoveryLogRepository for PostgresRecoveryLogRepository {
    async fn record(&self, operation: PendingOperation) -> AppResult<()> {
        let roles = serde_json::to_value(operation.roles()).map_err(|error| {
            AppError::Internal(format!("failed to serialize operation roles: {error}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO recovery_log
                (op_id, kind, role_set, account_resource, account_email,
                 resource, roles, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(operation.op_id())
        .bind(operation.kind().as_str())
        .bind(operation.role_set().as_str())
        .bind(operation.account().resource_name())
        .bind(operation.account().email())
        .bind(operation.resource())
        .bind(roles)
        .bind(operation.recorded_at())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to record pending operation: {error}"))
        })?;

        Ok(())
    }

    async fn clear(&self, op_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM recovery_log WHERE op_id = $1")
            .bind(op_id)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to clear pending operation: {error}"))
            })?;

        Ok(())
    }

    async fn list_recorded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<PendingOperation>> {
        let rows = sqlx::query_as::<_, RecoveryRow>(
            r#"
            SELECT op_id, kind, role_set, account_resource, account_email,
                   resource, roles, recorded_at
            FROM recovery_log
            WHERE recorded_at < $1
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list pending operations: {error}"))
        })?;

        rows.into_iter().map(RecoveryRow::into_operation).collect()
    }
}
