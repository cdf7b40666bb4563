//! Login, refresh and logout.
//!
//! Flow Overview:
//! 1) `/authenticate` checks the password, issues an access token (response
//!    body) and a refresh token (`auth-refresh` cookie), and opens a session
//!    holding the access token (`gatehouse_session` cookie).
//! 2) `/refresh` trades the refresh cookie for a new access token and updates
//!    the session.
//! 3) `/logout` drops the session and clears both cookies.

use super::{payload, signing_secret};
use crate::{
    api::{
        AuthState,
        authorization::{NO_AUTHORIZATION, NOT_AUTHORIZED, session_id},
        error::ApiError,
        session::{self, REFRESH_COOKIE_NAME, SESSION_COOKIE_NAME},
    },
    dataplane,
    model::{User, valid_username},
    password,
    secrets::{JWT_REFRESH_SECRET, JWT_SECRET, SESSION_SECRET},
    token::IssuedToken,
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::task;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(ToSchema, Deserialize, Debug)]
pub struct Credentials {
    pub username: String,
    #[schema(value_type = String, format = Password)]
    pub password: SecretString,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: String,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

impl TokenResponse {
    fn new(access: IssuedToken, ttl: Duration) -> Json<Self> {
        Json(Self {
            token: access.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: ttl.as_secs(),
        })
    }
}

fn cookie(name: &str, value: &str, max_age: Duration, secure: bool) -> Result<HeaderValue, ApiError> {
    session::build_cookie(name, value, max_age, secure)
        .map_err(|err| ApiError::Internal(format!("failed to build {name} cookie: {err}")))
}

#[utoipa::path(
    post,
    path = "/authenticate",
    request_body = Credentials,
    responses(
        (status = 200, description = "Access token issued; refresh and session cookies set", body = TokenResponse),
        (status = 400, description = "Malformed body", body = crate::api::error::ErrorBody),
        (status = 401, description = "Username or password is incorrect", body = crate::api::error::ErrorBody),
        (status = 500, description = "Token generation failure", body = crate::api::error::ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn authenticate(
    state: Extension<Arc<AuthState>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = payload(body)?;
    let username = credentials.username.trim().to_string();

    let user: Option<User> = if valid_username(&username) {
        dataplane::get(state.dataplane(), &username).await?
    } else {
        None
    };

    let plaintext = credentials.password;
    let verified = task::spawn_blocking(move || match user {
        Some(user) => password::verify(&plaintext, &user.password_hash).then_some(user),
        None => {
            password::verify_unknown_user(&plaintext);
            None
        }
    })
    .await?;

    // Same answer for an unknown user and a wrong password.
    let Some(user) = verified else {
        debug!("Authentication failed for {username}");
        return Err(ApiError::credentials());
    };

    let access = state
        .tokens()
        .issue_access(&*signing_secret(&state, JWT_SECRET).await?, &user)?;
    let refresh = state
        .tokens()
        .issue_refresh(&*signing_secret(&state, JWT_REFRESH_SECRET).await?, &user)?;

    let session_secret = signing_secret(&state, SESSION_SECRET).await?;
    let id = state.sessions().create(access.token.clone()).await;
    let signed = session::sign(&session_secret, &id)
        .ok_or_else(|| ApiError::Internal("failed to sign session".to_string()))?;

    let secure = state.config().cookie_secure();
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        cookie(
            REFRESH_COOKIE_NAME,
            &refresh.token,
            state.tokens().refresh_ttl(),
            secure,
        )?,
    );
    headers.append(
        SET_COOKIE,
        cookie(SESSION_COOKIE_NAME, &signed, state.sessions().ttl(), secure)?,
    );

    info!("User {} authenticated", user.username);

    Ok((headers, TokenResponse::new(access, state.tokens().access_ttl())))
}

#[utoipa::path(
    post,
    path = "/refresh",
    responses(
        (status = 200, description = "New access token", body = TokenResponse),
        (status = 401, description = "Missing, invalid or expired refresh token", body = crate::api::error::ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, ApiError> {
    let Some(token) = session::extract_cookie(&headers, REFRESH_COOKIE_NAME) else {
        return Err(ApiError::Unauthorized(NO_AUTHORIZATION.to_string()));
    };

    let refresh_secret = signing_secret(&state, JWT_REFRESH_SECRET).await?;
    let claims = state
        .tokens()
        .verify(&refresh_secret, &token)
        .map_err(|err| {
            debug!("Refresh token rejected: {err}");
            ApiError::Unauthorized(err.to_string())
        })?;

    if !claims.authorized {
        return Err(ApiError::Unauthorized(NOT_AUTHORIZED.to_string()));
    }

    // Roles and claims come from the stored user, not the refresh token.
    let user: Option<User> = dataplane::get(state.dataplane(), &claims.sub).await?;
    let Some(user) = user else {
        debug!("Refresh token for unknown user {}", claims.sub);
        return Err(ApiError::Unauthorized(NOT_AUTHORIZED.to_string()));
    };

    let access = state
        .tokens()
        .issue_access(&*signing_secret(&state, JWT_SECRET).await?, &user)?;

    if let Some(id) = session_id(&state, &headers).await {
        state.sessions().replace(&id, access.token.clone()).await;
    }

    Ok(TokenResponse::new(access, state.tokens().access_ttl()))
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 204, description = "Session removed and cookies cleared"),
    ),
    tag = "auth"
)]
pub async fn logout(
    state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(id) = session_id(&state, &headers).await {
        state.sessions().remove(&id).await;
    }

    let secure = state.config().cookie_secure();
    let mut cleared = HeaderMap::new();
    for name in [SESSION_COOKIE_NAME, REFRESH_COOKIE_NAME] {
        let value = session::clear_cookie(name, secure)
            .map_err(|err| ApiError::Internal(format!("failed to clear {name} cookie: {err}")))?;
        cleared.append(SET_COOKIE, value);
    }

    Ok((StatusCode::NO_CONTENT, cleared))
}
