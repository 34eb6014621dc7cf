//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod google_iam_client;
mod in_memory_iam_client;
mod in_memory_recovery_log_repository;
mod in_memory_role_set_repository;
mod postgres_recovery_log_repository;
mod postgres_role_set_repository;
mod redis_sweep_coordinator;

pub use google_iam_client::GoogleIamClient;
pub use in_memory_iam_client::InMemoryIamClient;
pub use in_memory_recovery_log_repository::InMemoryRecoveryLogRepository;
pub use in_memory_role_set_repository::InMemoryRoleSetRepository;
pub use postgres_recovery_log_repository::PostgresRecoveryLogRepository;
pub use postgres_role_set_repository::PostgresRoleSetRepository;
pub use redis_sweep_coordinator::RedisSweepCoordinator;
