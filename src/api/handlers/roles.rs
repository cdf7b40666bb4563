use super::payload;
use crate::{
    api::{AuthState, Principal, authorization::require_role, error::ApiError},
    dataplane,
    model::{Role, valid_role_name},
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug, Clone)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NewRole {
    /// # Errors
    /// Returns 400 if the name is not a valid role name.
    pub fn validate(&self) -> Result<(), ApiError> {
        if valid_role_name(&self.name) {
            Ok(())
        } else {
            Err(ApiError::BadRequest(format!(
                "invalid role name: {}",
                self.name
            )))
        }
    }

    #[must_use]
    pub fn into_role(self) -> Role {
        Role::new(&self.name, &self.description)
    }
}

#[utoipa::path(
    get,
    path = "/roles",
    responses(
        (status = 200, description = "All roles", body = [Role]),
        (status = 401, description = "Missing or invalid token", body = crate::api::error::ErrorBody),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_roles(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
) -> Result<Json<Vec<Role>>, ApiError> {
    require_role(&principal, state.config().admin_role())?;

    let roles: Vec<Role> = dataplane::list(state.dataplane()).await?;
    Ok(Json(roles))
}

#[utoipa::path(
    post,
    path = "/roles",
    request_body = NewRole,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Malformed body or invalid name", body = crate::api::error::ErrorBody),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
        (status = 409, description = "Role already exists", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn add_role(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
    body: Result<Json<NewRole>, JsonRejection>,
) -> Result<(StatusCode, Json<Role>), ApiError> {
    require_role(&principal, state.config().admin_role())?;

    let request = payload(body)?;
    request.validate()?;

    let role = request.into_role();
    dataplane::add(state.dataplane(), &role).await?;
    info!("{} created role {}", principal.subject, role.name);

    Ok((StatusCode::CREATED, Json(role)))
}
