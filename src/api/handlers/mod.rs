//! Route handlers.
//!
//! Handlers take their JSON body as `Result<Json<T>, JsonRejection>` so a
//! malformed body becomes a 400 with our error shape instead of axum's default.

pub mod admin;
pub mod authenticate;
pub mod enroll;
pub mod health;
pub mod me;
pub mod roles;
pub mod root;
pub mod secrets;
pub mod users;

use crate::{
    api::{AuthState, error::ApiError},
    dataplane,
    model::Role,
    secrets::Secret,
};
use axum::{Json, extract::rejection::JsonRejection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Plain confirmation body.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

pub(crate) fn payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(ApiError::from)
}

/// A secret the service cannot work without. Missing is a server fault here,
/// not a 404.
pub(crate) async fn signing_secret(state: &AuthState, name: &str) -> Result<Arc<Secret>, ApiError> {
    state
        .secrets()
        .get(name)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))
}

/// 400 for the first role in `roles` with no stored record.
pub(crate) async fn require_known_roles<'a>(
    state: &AuthState,
    roles: impl IntoIterator<Item = &'a String>,
) -> Result<(), ApiError> {
    for role in roles {
        let stored: Option<Role> = dataplane::get(state.dataplane(), role).await?;
        if stored.is_none() {
            return Err(ApiError::BadRequest(format!("unknown role: {role}")));
        }
    }
    Ok(())
}
