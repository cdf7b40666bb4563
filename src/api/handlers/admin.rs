use super::Message;
use crate::api::{AuthState, Principal, authorization::require_role, error::ApiError};
use axum::{Json, extract::Extension};
use std::sync::Arc;

pub const WELCOME: &str = "Welcome, Admin.";

#[utoipa::path(
    get,
    path = "/admin",
    responses(
        (status = 200, description = "Caller holds the admin role", body = Message),
        (status = 401, description = "Missing or invalid token", body = crate::api::error::ErrorBody),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn admin(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
) -> Result<Json<Message>, ApiError> {
    require_role(&principal, state.config().admin_role())?;
    Ok(Message::new(WELCOME))
}
