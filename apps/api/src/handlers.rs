//! HTTP handlers for the role-set, credential, and lease endpoints.

use std::str::FromStr;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use credmint_application::{CreateRoleSetInput, UpdateRoleSetInput};
use credmint_core::{AppError, RoleSetName};
use credmint_domain::SecretKind;

use crate::dto::{
    CreateRoleSetRequest, HealthResponse, KeyRequest, KeyResponse, LeasePayload,
    RenewLeaseRequest, RenewLeaseResponse, RevokeLeaseRequest, RoleSetListResponse,
    RoleSetResponse, TokenResponse, UpdateRoleSetRequest, duration_from_seconds,
};
use crate::error::ApiResult;
use crate::state::AppState;

/// Liveness probe.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Creates a role set under the name in the path.
pub async fn create_role_set_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<CreateRoleSetRequest>,
) -> ApiResult<(StatusCode, Json<RoleSetResponse>)> {
    let role_set = state
        .role_set_service
        .create(CreateRoleSetInput {
            name,
            project: request.project,
            secret_kind: request.secret_kind,
            bindings: request.bindings,
            token_scopes: request.token_scopes,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RoleSetResponse::from_role_set(&role_set)?),
    ))
}

/// Lists role-set names.
pub async fn list_role_sets_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<RoleSetListResponse>> {
    let names = state.role_set_service.list().await?;
    Ok(Json(RoleSetListResponse {
        role_sets: names.into_iter().map(|name| name.to_string()).collect(),
    }))
}

/// Returns one stored role set.
pub async fn get_role_set_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RoleSetResponse>> {
    let name = RoleSetName::new(name)?;
    let role_set = state.role_set_service.get(&name).await?;
    Ok(Json(RoleSetResponse::from_role_set(&role_set)?))
}

/// Updates a role set's bindings and/or scopes.
pub async fn update_role_set_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<UpdateRoleSetRequest>,
) -> ApiResult<Json<RoleSetResponse>> {
    let name = RoleSetName::new(name)?;
    let role_set = state
        .role_set_service
        .update(
            &name,
            UpdateRoleSetInput {
                bindings: request.bindings,
                token_scopes: request.token_scopes,
            },
        )
        .await?;
    Ok(Json(RoleSetResponse::from_role_set(&role_set)?))
}

/// Deletes a role set and its service account.
pub async fn delete_role_set_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    let name = RoleSetName::new(name)?;
    state.role_set_service.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Mints an access token through a token role set.
pub async fn issue_token_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TokenResponse>> {
    let name = RoleSetName::new(name)?;
    let issued = state
        .credential_service
        .issue_token(&name, state.lease_config)
        .await?;
    Ok(Json(TokenResponse::from_issued(&issued)))
}

/// Generates a service-account key through a key role set.
pub async fn issue_key_query_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(request): Query<KeyRequest>,
) -> ApiResult<Json<KeyResponse>> {
    issue_key(state, name, request).await
}

/// Generates a service-account key, taking the TTL override in the body.
pub async fn issue_key_body_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<KeyRequest>,
) -> ApiResult<Json<KeyResponse>> {
    issue_key(state, name, request).await
}

async fn issue_key(
    state: AppState,
    name: String,
    request: KeyRequest,
) -> ApiResult<Json<KeyResponse>> {
    let name = RoleSetName::new(name)?;
    let requested_ttl = request
        .ttl_seconds
        .map(|seconds| duration_from_seconds(seconds, "ttl_seconds"))
        .transpose()?;
    let issued = state
        .credential_service
        .issue_key(&name, state.lease_config, requested_ttl)
        .await?;
    Ok(Json(KeyResponse::from_issued(&issued)))
}

/// Renews a key lease handed back by the lease scheduler.
pub async fn renew_lease_handler(
    State(state): State<AppState>,
    Json(request): Json<RenewLeaseRequest>,
) -> ApiResult<Json<RenewLeaseResponse>> {
    if SecretKind::from_str(request.secret_kind.as_str())? == SecretKind::AccessToken {
        // Always an error; tokens have a fixed remote expiry.
        state.lease_service.renew_token()?;
    }

    let increment = duration_from_seconds(request.increment_seconds, "increment_seconds")?;
    let lease = required_lease(request.lease)?.into_lease()?;
    let renewed = state
        .lease_service
        .renew_key(&lease, Utc::now(), increment)
        .await?;
    Ok(Json(RenewLeaseResponse {
        lease: LeasePayload::from_lease(&renewed),
    }))
}

/// Revokes a lease handed back by the lease scheduler.
pub async fn revoke_lease_handler(
    State(state): State<AppState>,
    Json(request): Json<RevokeLeaseRequest>,
) -> ApiResult<StatusCode> {
    match SecretKind::from_str(request.secret_kind.as_str())? {
        SecretKind::AccessToken => {
            state.lease_service.revoke_token()?;
        }
        SecretKind::ServiceAccountKey => {
            let lease = required_lease(request.lease)?.into_lease()?;
            state.lease_service.revoke_key(&lease).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

fn required_lease(lease: Option<LeasePayload>) -> Result<LeasePayload, AppError> {
    lease.ok_or_else(|| {
        AppError::Validation("key lease operations require the 'lease' payload".to_owned())
    })
}
