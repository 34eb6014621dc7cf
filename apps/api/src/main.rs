//! Credmint API composition root.

#![forbid(unsafe_code)]

mod dto;
mod error;
mod handlers;
mod state;

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::routing::{get, post};
use credmint_application::{
    BindingReconciler, CredentialService, IamClient, LeaseService, RecoveryLogRepository,
    RoleSetRepository, RoleSetService,
};
use credmint_core::AppError;
use credmint_domain::LeaseConfig;
use credmint_infrastructure::{
    GoogleIamClient, InMemoryIamClient, InMemoryRecoveryLogRepository, InMemoryRoleSetRepository,
    PostgresRecoveryLogRepository, PostgresRoleSetRepository,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

    let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
    let api_port = env::var("API_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3001);

    let default_ttl_seconds = parse_env_i64("CREDMINT_DEFAULT_TTL_SECONDS", 3600)?;
    let max_ttl_seconds = parse_env_i64("CREDMINT_MAX_TTL_SECONDS", 7200)?;
    let lease_config = LeaseConfig::from_seconds(default_ttl_seconds, max_ttl_seconds)?;

    let remote_max_attempts = parse_env_u8("CREDMINT_REMOTE_MAX_ATTEMPTS", 4)?;
    let remote_backoff_ms = parse_env_u64("CREDMINT_REMOTE_BACKOFF_MS", 250)?;

    let storage_mode = env::var("CREDMINT_STORAGE_MODE").unwrap_or_else(|_| "postgres".to_owned());
    let (role_set_repository, recovery_log): (
        Arc<dyn RoleSetRepository>,
        Arc<dyn RecoveryLogRepository>,
    ) = match storage_mode.as_str() {
        "postgres" => {
            let database_url = required_env("DATABASE_URL")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to connect to database: {error}"))
                })?;

            sqlx::migrate!("../../crates/infrastructure/migrations")
                .run(&pool)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to run migrations: {error}"))
                })?;

            if migrate_only {
                info!("database migrations applied successfully");
                return Ok(());
            }

            (
                Arc::new(PostgresRoleSetRepository::new(pool.clone())),
                Arc::new(PostgresRecoveryLogRepository::new(pool)),
            )
        }
        "memory" => {
            warn!("running with in-memory storage, all state is lost on restart");
            (
                Arc::new(InMemoryRoleSetRepository::new()),
                Arc::new(InMemoryRecoveryLogRepository::new()),
            )
        }
        _ => {
            return Err(AppError::Validation(format!(
                "CREDMINT_STORAGE_MODE must be either 'postgres' or 'memory', got '{storage_mode}'"
            )));
        }
    };

    let iam = build_iam_client(remote_max_attempts, remote_backoff_ms)?;

    let reconciler = BindingReconciler::new(
        iam.clone(),
        recovery_log.clone(),
        remote_max_attempts,
        remote_backoff_ms,
    );
    let app_state = AppState {
        role_set_service: RoleSetService::new(
            role_set_repository.clone(),
            recovery_log,
            iam.clone(),
            reconciler,
        ),
        credential_service: CredentialService::new(role_set_repository, iam.clone()),
        lease_service: LeaseService::new(iam),
        lease_config,
    };

    let cors_layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/rolesets", get(handlers::list_role_sets_handler))
        .route(
            "/rolesets/{name}",
            get(handlers::get_role_set_handler)
                .post(handlers::create_role_set_handler)
                .put(handlers::update_role_set_handler)
                .delete(handlers::delete_role_set_handler),
        )
        .route("/token/{name}", get(handlers::issue_token_handler))
        .route(
            "/key/{name}",
            get(handlers::issue_key_query_handler).post(handlers::issue_key_body_handler),
        )
        .route("/leases/renew", post(handlers::renew_lease_handler))
        .route("/leases/revoke", post(handlers::revoke_lease_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(app_state);

    let host = IpAddr::from_str(&api_host)
        .map_err(|error| AppError::Internal(format!("invalid API_HOST '{api_host}': {error}")))?;
    let address = SocketAddr::from((host, api_port));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, "credmint-api started");

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")))
}

fn build_iam_client(max_attempts: u8, backoff_ms: u64) -> Result<Arc<dyn IamClient>, AppError> {
    let iam_mode = env::var("CREDMINT_IAM_MODE").unwrap_or_else(|_| "google".to_owned());
    match iam_mode.as_str() {
        "google" => {
            let auth_token = required_non_empty_env("GOOGLE_AUTH_TOKEN")?;
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
            warn!("running with the in-memory IAM emulator, no real credentials are issued");
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

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn required_non_empty_env(name: &str) -> Result<String, AppError> {
    let value = required_env(name)?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn parse_env_i64(name: &str, default: i64) -> Result<i64, AppError> {
    match env::var(name) {
        Ok(value) => value
            .parse::<i64>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_u8(name: &str, default: u8) -> Result<u8, AppError> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u8>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, AppError> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        Err(_) => Ok(default),
    }
}
