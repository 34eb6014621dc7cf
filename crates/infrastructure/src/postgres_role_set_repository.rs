use std::str::FromStr;

use async_trait::async_trait;
use credmint_application::RoleSetRepository;
use credmint_core::{AppError, AppResult, ProjectId, RoleSetName};
use credmint_domain::{ResourceBindings, RoleSet, SecretKind, ServiceAccountRef};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

/// PostgreSQL-backed role-set repository.
#[derive(Clone)]
pub struct PostgresRoleSetRepository {
    pool: PgPool,
}

impl PostgresRoleSetRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RoleSetRow {
    name: String,
    project: String,
    secret_kind: String,
    account_resource: String,
    account_email: String,
    bindings: Value,
    token_scopes: Value,
    version: i64,
}

impl RoleSetRow {
    fn into_role_set(self) -> AppResult<RoleSet> {
        let bindings: ResourceBindings =
            serde_json::from_value(self.bindings).map_err(|error| {
                AppError::Internal(format!(
                    "persisted bindings for role set '{}' are invalid: {error}",
                    self.name
                ))
            })?;
        let token_scopes: Vec<String> =
            serde_json::from_value(self.token_scopes).map_err(|error| {
                AppError::Internal(format!(
                    "persisted token scopes for role set '{}' are invalid: {error}",
                    self.name
                ))
            })?;
        let version = u64::try_from(self.version).map_err(|error| {
            AppError::Internal(format!(
                "persisted version for role set '{}' is invalid: {error}",
                self.name
            ))
        })?;

        RoleSet::from_stored(
            RoleSetName::new(self.name)?,
            ProjectId::new(self.project)?,
            SecretKind::from_str(self.secret_kind.as_str())?,
            ServiceAccountRef::new(self.account_resource, self.account_email)?,
            bindings,
            token_scopes,
            version,
        )
    }
}

fn signed_version(version: u64) -> AppResult<i64> {
    i64::try_from(version)
        .map_err(|error| AppError::Internal(format!("role set version out of range: {error}")))
}

#[async_trait]
impl RoleSetRepository for PostgresRoleSetRepository {
    async fn insert(&self, role_set: RoleSet) -> AppResult<()> {
        let bindings = serde_json::to_value(role_set.bindings()).map_err(|error| {
            AppError::Internal(format!("failed to serialize bindings: {error}"))
        })?;
        let token_scopes = serde_json::to_value(role_set.token_scopes()).map_err(|error| {
            AppError::Internal(format!("failed to serialize token scopes: {error}"))
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO role_sets
                (name, project, secret_kind, account_resource, account_email,
                 bindings, token_scopes, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(role_set.name().as_str())
        .bind(role_set.project().as_str())
        .bind(role_set.secret_kind().as_str())
        .bind(role_set.account().resource_name())
        .bind(role_set.account().email())
        .bind(bindings)
        .bind(token_scopes)
        .bind(signed_version(role_set.version())?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                if let sqlx::Error::Database(database_error) = &error
                    && database_error.code().as_deref() == Some("23505")
                {
                    return Err(AppError::Conflict(format!(
                        "role set '{}' already exists",
                        role_set.name()
                    )));
                }

                Err(AppError::Internal(format!(
                    "failed to insert role set: {error}"
                )))
            }
        }
    }

    async fn find(&self, name: &RoleSetName) -> AppResult<Option<RoleSet>> {
        let row = sqlx::query_as::<_, RoleSetRow>(
            r#"
            SELECT name, project, secret_kind, account_resource, account_email,
                   bindings, token_scopes, version
            FROM role_sets
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to load role set: {error}")))?;

        row.map(RoleSetRow::into_role_set).transpose()
    }

    async fn update(&self, role_set: RoleSet, expected_version: u64) -> AppResult<()> {
        let bindings = serde_json::to_value(role_set.bindings()).map_err(|error| {
            AppError::Internal(format!("failed to serialize bindings: {error}"))
        })?;
        let token_scopes = serde_json::to_value(role_set.token_scopes()).map_err(|error| {
            AppError::Internal(format!("failed to serialize token scopes: {error}"))
        })?;

        let result = sqlx::query(
            r#"
            UPDATE role_sets
            SET bindings = $1, token_scopes = $2, version = $3, updated_at = now()
            WHERE name = $4 AND version = $5
            "#,
        )
        .bind(bindings)
        .bind(token_scopes)
        .bind(signed_version(role_set.version())?)
        .bind(role_set.name().as_str())
        .bind(signed_version(expected_version)?)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update role set: {error}")))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        if self.find(role_set.name()).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "role set '{}' was updated concurrently",
                role_set.name()
            )));
        }

        Err(AppError::NotFound(format!(
            "role set '{}' does not exist",
            role_set.name()
        )))
    }

    async fn delete(&self, name: &RoleSetName) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM role_sets WHERE name = $1")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(|error| AppError::Internal(format!("failed to delete role set: {error}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "role set '{name}' does not exist"
            )));
        }
        Ok(())
    }

    async fn list_names(&self) -> AppResult<Vec<RoleSetName>> {
        let names: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM role_sets ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to list role sets: {error}"))
                })?;

        names
            .into_iter()
            .map(|(name,)| RoleSetName::new(name))
            .collect()
    }
}
