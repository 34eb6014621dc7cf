//! Credmint recovery sweeper runtime.
//!
//! Periodically resolves stale recovery-log entries left behind by crashed
//! or failed multi-step mutations. A Redis lease keeps replicas from
//! sweeping concurrently; the sweep itself is idempotent, so coordination
//! is an efficiency concern only.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use credmint_application::{IamClient, RecoverySweeper, SweepCoordinator};
use credmint_core::{AppError, AppResult};
use credmint_infrastructure::{
    GoogleIamClient, InMemoryIamClient, PostgresRecoveryLogRepository, PostgresRoleSetRepository,
    RedisSweepCoordinator,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const SWEEP_SCOPE_KEY: &str = "recovery-log";

#[derive(Debug, Clone)]
struct SweeperConfig {
    database_url: String,
    redis_url: String,
    holder_id: String,
    lease_seconds: u32,
    poll_interval_ms: u64,
    min_entry_age_seconds: i64,
    remote_max_attempts: u8,
    remote_backoff_ms: u64,
}

impl SweeperConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let redis_url = required_env("REDIS_URL")?;
        let holder_id = env::var("SWEEPER_ID")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("sweeper-{}", std::process::id()));
        let lease_seconds = parse_env_u32("SWEEPER_LEASE_SECONDS", 60)?;
        let poll_interval_ms = parse_env_u64("SWEEPER_POLL_INTERVAL_MS", 30_000)?;
        let min_entry_age_seconds = parse_env_i64("SWEEPER_MIN_ENTRY_AGE_SECONDS", 300)?;
        let remote_max_attempts = parse_env_u8("CREDMINT_REMOTE_MAX_ATTEMPTS", 4)?;
        let remote_backoff_ms = parse_env_u64("CREDMINT_REMOTE_BACKOFF_MS", 250)?;

        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "SWEEPER_LEASE_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "SWEEPER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if min_entry_age_seconds < 0 {
            return Err(AppError::Validation(
                "SWEEPER_MIN_ENTRY_AGE_SECONDS must not be negative".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            redis_url,
            holder_id,
            lease_seconds,
            poll_interval_ms,
            min_entry_age_seconds,
            remote_max_attempts,
            remote_backoff_ms,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = SweeperConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config.database_url.as_str())
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    let redis_client = redis::Client::open(config.redis_url.as_str())
        .map_err(|error| AppError::Internal(format!("failed to open redis client: {error}")))?;
    let coordinator = RedisSweepCoordinator::new(redis_client, "credmint:sweep");

    let iam = build_iam_client(config.remote_max_attempts, config.remote_backoff_ms)?;
    let sweeper = RecoverySweeper::new(
        iam,
        Arc::new(PostgresRoleSetRepository::new(pool.clone())),
        Arc::new(PostgresRecoveryLogRepository::new(pool)),
        ChronoDuration::seconds(config.min_entry_age_seconds),
        config.remote_max_attempts,
        config.remote_backoff_ms,
    );

    info!(
        holder_id = %config.holder_id,
        lease_seconds = config.lease_seconds,
        poll_interval_ms = config.poll_interval_ms,
        min_entry_age_seconds = config.min_entry_age_seconds,
        "credmint-sweeper started"
    );

    loop {
        match coordinator
            .try_acquire(SWEEP_SCOPE_KEY, config.holder_id.as_str(), config.lease_seconds)
            .await
        {
            Ok(Some(lease)) => {
                match sweeper.sweep().await {
                    Ok(report) => {
                        debug!(
                            examined = report.examined,
                            completed = report.completed,
                            deferred = report.deferred,
                            "sweep pass finished"
                        );
                    }
                    Err(error) => {
                        warn!(holder_id = %config.holder_id, %error, "sweep pass failed");
                    }
                }

                if let Err(error) = coordinator.release(&lease).await {
                    warn!(holder_id = %config.holder_id, %error, "failed to release sweep lease");
                }
            }
            Ok(None) => {
                debug!(holder_id = %config.holder_id, "another instance holds the sweep lease");
            }
            Err(error) => {
                warn!(holder_id = %config.holder_id, %error, "failed to acquire sweep lease");
            }
        }

        tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
    }
}

fn build_iam_client(max_attempts: u8, backoff_ms: u64) -> Result<Arc<dyn IamClient>, AppError> {
    let iam_mode = env::var("CREDMINT_IAM_MODE").unwrap_or_else(|_| "google".to_owned());
    match iam_mode.as_str() {
        "google" => {
            let auth_token = required_env("GOOGLE_AUTH_TOKEN")?;
            let http_client = reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .map_err(|error| {
                    AppError::Internal(format!("failed to build HTTP client: {error}"))
                })?;
            Ok(Arc::new(GoogleIamClient::new(
                http_client,
                auth_token,
                max_attempts,
                backoff_ms,
            )))
        }
        "memory" => {
            warn!("running with the in-memory IAM emulator, sweeps touch no real resources");
            Ok(Arc::new(InMemoryIamClient::new()))
        }
        _ => Err(AppError::Validation(format!(
            "CREDMINT_IAM_MODE must be either 'google' or 'memory', got '{iam_mode}'"
        ))),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u8(name: &str, default: u8) -> AppResult<u8> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u8>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u32>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_i64(name: &str, default: i64) -> AppResult<i64> {
    match env::var(name) {
        Ok(value) => value
            .parse::<i64>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        Err(_) => Ok(default),
    }
}
