//! Read-only view of the signing secrets plus rotation.
//!
//! Key material never leaves the service; these routes only return
//! [`SecretMetadata`].

use crate::{
    api::{AuthState, Principal, authorization::require_role, error::ApiError},
    secrets::{SecretError, SecretMetadata, valid_secret_name},
};
use axum::{
    Json,
    extract::{Extension, Path},
};
use std::sync::Arc;
use tracing::info;

fn checked(name: &str) -> Result<&str, ApiError> {
    if valid_secret_name(name) {
        Ok(name)
    } else {
        Err(SecretError::InvalidName(name.to_string()).into())
    }
}

#[utoipa::path(
    get,
    path = "/secrets",
    responses(
        (status = 200, description = "Names of the loaded secrets", body = [String]),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "secrets"
)]
pub async fn list_secrets(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
) -> Result<Json<Vec<String>>, ApiError> {
    require_role(&principal, state.config().admin_role())?;
    Ok(Json(state.secrets().names().await))
}

#[utoipa::path(
    get,
    path = "/secrets/{name}",
    params(("name" = String, Path, description = "Secret name")),
    responses(
        (status = 200, description = "Secret metadata", body = SecretMetadata),
        (status = 400, description = "Invalid secret name", body = crate::api::error::ErrorBody),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
        (status = 404, description = "No such secret", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "secrets"
)]
pub async fn get_secret(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<SecretMetadata>, ApiError> {
    require_role(&principal, state.config().admin_role())?;

    let secret = state.secrets().get(checked(&name)?).await?;
    Ok(Json(secret.metadata()))
}

#[utoipa::path(
    post,
    path = "/secrets/{name}/rotate",
    params(("name" = String, Path, description = "Secret name")),
    responses(
        (status = 200, description = "Secret rotated; the previous key stays valid until it expires", body = SecretMetadata),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
        (status = 404, description = "No such secret", body = crate::api::error::ErrorBody),
        (status = 409, description = "Secret was modified concurrently", body = crate::api::error::ErrorBody),
        (status = 500, description = "Secret manager failure", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "secrets"
)]
pub async fn rotate_secret(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<SecretMetadata>, ApiError> {
    require_role(&principal, state.config().admin_role())?;

    let secret = state.secrets().rotate(checked(&name)?).await?;
    info!("{} rotated secret {name}", principal.subject);

    Ok(Json(secret.metadata()))
}
