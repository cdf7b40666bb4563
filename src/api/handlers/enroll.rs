//! Bootstrap of a fresh deployment.
//!
//! Flow Overview:
//! 1) Take the bootstrap permit (fails once initialized).
//! 2) Create the default signing secrets plus any requested ones.
//! 3) Store the role, then the user with its password hashed. Any other role
//!    listed on the user must already exist.
//! 4) Write the initialization marker.
//!
//! Every step tolerates records left behind by an earlier attempt that failed
//! before step 4, so a retry with the same payload completes the bootstrap.

use super::{Message, payload, require_known_roles, roles::NewRole};
use crate::{
    api::{AuthState, error::ApiError},
    dataplane::{self, DataplaneError},
    model::{NewUser, User, valid_username},
    password,
    secrets::DEFAULT_SECRETS,
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

pub const INITIALIZED: &str = "successfully initialized the service";

/// Extra signing secret to create during bootstrap.
#[derive(ToSchema, Deserialize, Debug, Clone)]
pub struct SecretRequest {
    pub name: String,
    /// Key size in bytes; the configured default when omitted.
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub expiry_seconds: Option<u64>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct Enrollment {
    pub role: NewRole,
    pub user: NewUser,
    #[serde(default)]
    pub secrets: Vec<SecretRequest>,
}

#[utoipa::path(
    post,
    path = "/init",
    request_body = Enrollment,
    responses(
        (status = 200, description = "Service initialized", body = Message),
        (status = 400, description = "Malformed enrollment", body = crate::api::error::ErrorBody),
        (status = 401, description = "Service already initialized", body = crate::api::error::ErrorBody),
        (status = 409, description = "User exists with a different password", body = crate::api::error::ErrorBody),
        (status = 500, description = "Storage or secret manager failure", body = crate::api::error::ErrorBody),
    ),
    tag = "bootstrap"
)]
pub async fn init(
    state: Extension<Arc<AuthState>>,
    body: Result<Json<Enrollment>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    bootstrap(&state, payload(body)?).await
}

#[utoipa::path(
    post,
    path = "/enroll",
    request_body = Enrollment,
    responses(
        (status = 200, description = "Service initialized", body = Message),
        (status = 400, description = "Malformed enrollment", body = crate::api::error::ErrorBody),
        (status = 401, description = "Service already initialized", body = crate::api::error::ErrorBody),
        (status = 409, description = "User exists with a different password", body = crate::api::error::ErrorBody),
        (status = 500, description = "Storage or secret manager failure", body = crate::api::error::ErrorBody),
    ),
    tag = "bootstrap"
)]
pub async fn enroll(
    state: Extension<Arc<AuthState>>,
    body: Result<Json<Enrollment>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    bootstrap(&state, payload(body)?).await
}

#[instrument(skip_all, fields(role = %enrollment.role.name, username = %enrollment.user.username))]
async fn bootstrap(state: &AuthState, enrollment: Enrollment) -> Result<Json<Message>, ApiError> {
    let Enrollment {
        role,
        mut user,
        secrets,
    } = enrollment;

    role.validate()?;
    let username = user.username.trim().to_string();
    if !valid_username(&username) {
        return Err(ApiError::BadRequest(format!("invalid username: {username}")));
    }

    let permit = state.guard().begin().await?;

    // Extra roles on the user must already exist; only the enrolled role is created here.
    // Collected up front so the future stays `Send` for the router.
    let extra_roles: Vec<&String> = user.roles.iter().filter(|name| **name != role.name).collect();
    require_known_roles(state, extra_roles).await?;

    let config = state.config();
    let expiry = config.secret_expiry().as_secs();
    for name in DEFAULT_SECRETS {
        state
            .secrets()
            .create(name, config.secret_size(), expiry)
            .await?;
    }
    for secret in &secrets {
        state
            .secrets()
            .create(
                &secret.name,
                secret.size.unwrap_or(config.secret_size()),
                secret.expiry_seconds.unwrap_or(expiry),
            )
            .await?;
    }

    let role_name = role.name.clone();
    match dataplane::add(state.dataplane(), &role.into_role()).await {
        Ok(()) => info!("Created role {role_name}"),
        Err(DataplaneError::Conflict { .. }) => debug!("Role {role_name} already exists"),
        Err(err) => return Err(err.into()),
    }

    if !user.roles.contains(&role_name) {
        user.roles.push(role_name);
    }

    let plaintext = user.password.clone();
    let hash = task::spawn_blocking(move || password::hash(&plaintext)).await??;

    let candidate = user.password.clone();
    match dataplane::add(state.dataplane(), &user.into_user(hash)).await {
        Ok(()) => info!("Created user {username}"),
        Err(DataplaneError::Conflict { .. }) => {
            let existing: Option<User> = dataplane::get(state.dataplane(), &username).await?;
            let same_password = match existing {
                Some(existing) => {
                    task::spawn_blocking(move || {
                        password::verify(&candidate, &existing.password_hash)
                    })
                    .await?
                }
                None => false,
            };
            if !same_password {
                return Err(ApiError::Conflict(format!("user {username} already exists")));
            }
            debug!("User {username} left by an earlier attempt, reusing it");
        }
        Err(err) => return Err(err.into()),
    }

    permit.complete().await?;

    Ok(Message::new(INITIALIZED))
}
