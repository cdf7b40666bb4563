use super::{payload, require_known_roles};
use crate::{
    api::{AuthState, Principal, authorization::require_role, error::ApiError},
    dataplane,
    model::{NewUser, User, UserView, valid_username},
    password,
};
use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
};
use std::sync::Arc;
use tokio::task;
use tracing::info;

#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "All users, without password hashes", body = [UserView]),
        (status = 401, description = "Missing or invalid token", body = crate::api::error::ErrorBody),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    require_role(&principal, state.config().admin_role())?;

    let users: Vec<User> = dataplane::list(state.dataplane()).await?;
    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

#[utoipa::path(
    post,
    path = "/users",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = UserView),
        (status = 400, description = "Malformed body, invalid username or unknown role", body = crate::api::error::ErrorBody),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
        (status = 409, description = "User already exists", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn add_user(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    require_role(&principal, state.config().admin_role())?;

    let request = payload(body)?;
    let username = request.username.trim().to_string();
    if !valid_username(&username) {
        return Err(ApiError::BadRequest(format!("invalid username: {username}")));
    }

    require_known_roles(&state, &request.roles).await?;

    let plaintext = request.password.clone();
    let hash = task::spawn_blocking(move || password::hash(&plaintext)).await??;

    let user = request.into_user(hash);
    dataplane::add(state.dataplane(), &user).await?;
    info!("{} created user {}", principal.subject, user.username);

    Ok((StatusCode::CREATED, Json(UserView::from(user))))
}

#[utoipa::path(
    get,
    path = "/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "The user, without password hash", body = UserView),
        (status = 403, description = "Caller is not an administrator", body = crate::api::error::ErrorBody),
        (status = 404, description = "No such user", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    state: Extension<Arc<AuthState>>,
    principal: Extension<Principal>,
    Path(username): Path<String>,
) -> Result<Json<UserView>, ApiError> {
    require_role(&principal, state.config().admin_role())?;

    let user: Option<User> = dataplane::get(state.dataplane(), &username).await?;
    user.map(|user| Json(UserView::from(user)))
        .ok_or_else(|| ApiError::NotFound(format!("user {username} not found")))
}
