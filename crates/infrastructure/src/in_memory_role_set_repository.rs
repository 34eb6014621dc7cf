use std::collections::HashMap;

use async_trait::async_trait;
use credmint_application::RoleSetRepository;
use credmint_core::{AppError, AppResult, RoleSetName};
use credmint_domain::RoleSet;
use tokio::sync::RwLock;

/// In-memory role-set repository for local development and tests.
#[derive(Default)]
pub struct InMemoryRoleSetRepository {
    records: RwLock<HashMap<RoleSetName, RoleSet>>,
}

impl InMemoryRoleSetRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleSetRepository for InMemoryRoleSetRepository {
    async fn insert(&self, role_set: RoleSet) -> AppResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(role_set.name()) {
            return Err(AppError::Conflict(format!(
                "role set '{}' already exists",
                role_set.name()
            )));
        }

        records.insert(role_set.name().clone(), role_set);
        Ok(())
    }

    async fn find(&self, name: &RoleSetName) -> AppResult<Option<RoleSet>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn update(&self, role_set: RoleSet, expected_version: u64) -> AppResult<()> {
        let mut records = self.records.write().await;
        let stored = records.get(role_set.name()).ok_or_else(|| {
            AppError::NotFound(format!("role set '{}' does not exist", role_set.name()))
        })?;

        if stored.version() != expected_version {
            return Err(AppError::Conflict(format!(
                "role set '{}' was updated concurrently, expected version {expected_version} \
                 but found {}",
                role_set.name(),
                stored.version()
            )));
        }

        records.insert(role_set.name().clone(), role_set);
        Ok(())
    }

    async fn delete(&self, name: &RoleSetName) -> AppResult<()> {
        if self.records.write().await.remove(name).is_none() {
            return Err(AppError::NotFound(format!(
                "role set '{name}' does not exist"
            )));
        }
        Ok(())
    }

    async fn list_names(&self) -> AppResult<Vec<RoleSetName>> {
        let mut names: Vec<RoleSetName> = self.records.read().await.keys().cloned().collect();
        names.sort_by(|left, right| left.as_str().cmp(right.as_str()));
        Ok(names)
    }
}
