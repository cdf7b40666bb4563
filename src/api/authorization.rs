//! Token lookup and verification for protected routes.
//!
//! Flow Overview: try each configured [`TokenSource`] in order, verify the
//! first token found against `jwtsecretkey` (current key, then previous keys)
//! and attach a [`Principal`] to the request.

use crate::{
    api::{AuthState, error::ApiError, session},
    secrets::{JWT_SECRET, SESSION_SECRET, SecretError},
    token::{Claims, TokenError},
};
use anyhow::bail;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, sync::Arc};
use tracing::{debug, error};
use utoipa::ToSchema;

pub const NO_AUTHORIZATION: &str = "no authorization information found";
pub const NOT_AUTHORIZED: &str = "token is not authorized";
pub const INSUFFICIENT_ROLE: &str = "insufficient role";

/// Where a request may carry its access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Server-side session referenced by the signed session cookie.
    Session,
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// A cookie holding the token itself.
    Cookie(String),
}

impl TokenSource {
    /// Parse `session`, `bearer` or `cookie:<name>`.
    ///
    /// # Errors
    /// Returns an error for anything else.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "bearer" => Ok(Self::Bearer),
            "cookie" => Ok(Self::Cookie(session::AUTH_COOKIE_NAME.to_string())),
            lower if lower.starts_with("cookie:") => {
                let name = value["cookie:".len()..].trim();
                if name.is_empty() {
                    bail!("cookie token source needs a cookie name");
                }
                Ok(Self::Cookie(name.to_string()))
            }
            _ => bail!("unknown token source: {value}"),
        }
    }

    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::Session,
            Self::Bearer,
            Self::Cookie(session::AUTH_COOKIE_NAME.to_string()),
        ]
    }
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Bearer => f.write_str("bearer"),
            Self::Cookie(name) => write!(f, "cookie:{name}"),
        }
    }
}

/// Identity attached to an authorized request.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<String>,
    #[schema(value_type = Object)]
    pub claims: Map<String, Value>,
    pub expires_at: i64,
}

impl Principal {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            roles: claims.roles,
            claims: claims.extra,
            expires_at: claims.exp,
        }
    }
}

/// # Errors
/// Returns 403 when the principal lacks `role`.
pub fn require_role(principal: &Principal, role: &str) -> Result<(), ApiError> {
    if principal.has_role(role) {
        Ok(())
    } else {
        debug!("{} lacks role {role}", principal.subject);
        Err(ApiError::Forbidden(INSUFFICIENT_ROLE.to_string()))
    }
}

/// Session id from a correctly signed session cookie.
pub(crate) async fn session_id(state: &AuthState, headers: &HeaderMap) -> Option<String> {
    let cookie = session::extract_cookie(headers, session::SESSION_COOKIE_NAME)?;
    // Without a session key there can be no valid session cookie.
    let secret = state.secrets().get(SESSION_SECRET).await.ok()?;
    session::unsign(&secret, &cookie).map(str::to_string)
}

async fn session_token(state: &AuthState, headers: &HeaderMap) -> Option<String> {
    let id = session_id(state, headers).await?;
    state.sessions().get(&id).await
}

/// First token found by the configured sources, in order.
pub(crate) async fn locate_token(state: &AuthState, headers: &HeaderMap) -> Option<String> {
    for source in state.config().token_sources() {
        let token = match source {
            TokenSource::Session => session_token(state, headers).await,
            TokenSource::Bearer => session::extract_bearer_token(headers),
            TokenSource::Cookie(name) => session::extract_cookie(headers, name),
        };
        if token.is_some() {
            debug!("Token found via {source}");
            return token;
        }
    }
    None
}

/// Verify an access token and turn it into a principal.
///
/// # Errors
/// Returns 401 for any token problem and 500 if the signing secret cannot be read.
pub async fn principal_from_token(state: &AuthState, token: &str) -> Result<Principal, ApiError> {
    let secret = match state.secrets().get(JWT_SECRET).await {
        Ok(secret) => secret,
        // No signing key yet, so no token can be valid.
        Err(SecretError::NotFound(_)) => {
            return Err(ApiError::Unauthorized(
                TokenError::InvalidSignature.to_string(),
            ));
        }
        Err(err) => {
            error!("Failed to read signing secret: {err}");
            return Err(ApiError::Internal(err.to_string()));
        }
    };

    let claims = state.tokens().verify(&secret, token).map_err(|err| {
        debug!("Token rejected: {err}");
        ApiError::Unauthorized(err.to_string())
    })?;

    if !claims.authorized {
        return Err(ApiError::Unauthorized(NOT_AUTHORIZED.to_string()));
    }

    Ok(Principal::from(claims))
}

/// Middleware for protected routes.
pub async fn authorize(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = locate_token(&state, request.headers()).await else {
        return Err(ApiError::Unauthorized(NO_AUTHORIZATION.to_string()));
    };

    let principal = principal_from_token(&state, &token).await?;
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_sources() {
        assert_eq!(TokenSource::parse("session").unwrap(), TokenSource::Session);
        assert_eq!(TokenSource::parse(" Bearer ").unwrap(), TokenSource::Bearer);
        assert_eq!(
            TokenSource::parse("cookie").unwrap(),
            TokenSource::Cookie("auth".to_string())
        );
        assert_eq!(
            TokenSource::parse("cookie:JWT").unwrap(),
            TokenSource::Cookie("JWT".to_string())
        );
        assert!(TokenSource::parse("cookie:").is_err());
        assert!(TokenSource::parse("header").is_err());
    }

    #[test]
    fn display_round_trips() {
        for source in TokenSource::defaults() {
            assert_eq!(TokenSource::parse(&source.to_string()).unwrap(), source);
        }
    }

    #[test]
    fn require_role_is_forbidden_without_role() {
        let principal = Principal {
            subject: "bob".to_string(),
            roles: vec!["viewer".to_string()],
            claims: Map::new(),
            expires_at: 0,
        };
        assert!(require_role(&principal, "viewer").is_ok());
        let err = require_role(&principal, "admin").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), INSUFFICIENT_ROLE);
    }
}
