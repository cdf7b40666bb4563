//! Access and refresh tokens.
//!
//! Tokens are HS256 JWTs (`jsonwebtoken`) signed with the current key of a [`Secret`]. The claim
//! set always carries `sub`, `roles`, `authorized`, `iat` and `exp`; caller
//! claims are merged on top and may replace them, so only server code should
//! ever pass claims to [`TokenService::issue`].

mod error;
pub mod jwt;

pub use self::error::TokenError;

use crate::{model::User, secrets::Secret, unix_now};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(86_400);

/// Verified claim set.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub roles: Vec<String>,
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
    /// Everything that is not a reserved claim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    fn from_map(mut map: Map<String, Value>) -> Result<Self, TokenError> {
        let sub = match map.remove("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub,
            _ => return Err(TokenError::InvalidClaims("sub")),
        };

        let roles = match map.remove("roles") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(role) => Ok(role),
                    _ => Err(TokenError::InvalidClaims("roles")),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(TokenError::InvalidClaims("roles")),
        };

        let authorized = map
            .remove("authorized")
            .and_then(|value| value.as_bool())
            .unwrap_or(false);

        let exp = map
            .remove("exp")
            .and_then(|value| value.as_i64())
            .ok_or(TokenError::InvalidClaims("exp"))?;

        let iat = map.remove("iat").and_then(|value| value.as_i64());

        Ok(Self {
            sub,
            roles,
            authorized,
            iat,
            exp,
            extra: map,
        })
    }
}

/// A freshly signed token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenService {
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl Default for TokenService {
    fn default() -> Self {
        Self::new(DEFAULT_ACCESS_TOKEN_TTL, DEFAULT_REFRESH_TOKEN_TTL)
    }
}

impl TokenService {
    #[must_use]
    pub const fn new(access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            access_ttl,
            refresh_ttl,
        }
    }

    #[must_use]
    pub const fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub const fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign a token for `subject` that expires `ttl` from now.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue(
        &self,
        secret: &Secret,
        subject: &str,
        roles: &[String],
        claims: &Map<String, Value>,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        Self::issue_at(secret, subject, roles, claims, ttl, unix_now())
    }

    /// Same as [`TokenService::issue`] with an explicit clock.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_at(
        secret: &Secret,
        subject: &str,
        roles: &[String],
        claims: &Map<String, Value>,
        ttl: Duration,
        now: i64,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

        let mut payload = Map::new();
        payload.insert("sub".to_string(), Value::from(subject));
        payload.insert("roles".to_string(), Value::from(roles.to_vec()));
        payload.insert("authorized".to_string(), Value::Bool(true));
        payload.insert("iat".to_string(), Value::from(now));
        payload.insert("exp".to_string(), Value::from(expires_at));
        for (name, value) in claims {
            payload.insert(name.clone(), value.clone());
        }

        let token = jwt::encode(secret.key().as_bytes(), &payload)?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Short-lived token presented on every request.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_access(&self, secret: &Secret, user: &User) -> Result<IssuedToken, TokenError> {
        self.issue(secret, &user.username, &user.roles, &user.claims, self.access_ttl)
    }

    /// Long-lived token only accepted by `/refresh`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_refresh(&self, secret: &Secret, user: &User) -> Result<IssuedToken, TokenError> {
        self.issue(
            secret,
            &user.username,
            &user.roles,
            &Map::new(),
            self.refresh_ttl,
        )
    }

    /// Verify a token against the secret's current key, then its previous keys.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, uses a non-HMAC algorithm,
    /// matches none of the keys, or has expired.
    pub fn verify(&self, secret: &Secret, token: &str) -> Result<Claims, TokenError> {
        Self::verify_at(secret, token, unix_now())
    }

    /// Same as [`TokenService::verify`] with an explicit clock.
    ///
    /// # Errors
    /// See [`TokenService::verify`].
    pub fn verify_at(secret: &Secret, token: &str, now: i64) -> Result<Claims, TokenError> {
        let alg = jwt::algorithm(token)?;

        let mut verified = None;
        for key in secret.verification_keys(now) {
            if let Some(map) = jwt::decode_with(token, alg, key.as_bytes())? {
                verified = Some(map);
                break;
            }
        }

        let claims = Claims::from_map(verified.ok_or(TokenError::InvalidSignature)?)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
