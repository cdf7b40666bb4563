//! Server-side sessions and cookie helpers.
//!
//! A session maps a random id to the access token issued at login. The cookie
//! carries `id.signature`, where the signature is HMAC-SHA256 of the id under
//! the `sessionkey` secret, so a forged or tampered id is rejected before the
//! store is consulted.

use crate::{secrets::Secret, unix_now};
use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

pub const SESSION_COOKIE_NAME: &str = "gatehouse_session";
pub const REFRESH_COOKIE_NAME: &str = "auth-refresh";
pub const AUTH_COOKIE_NAME: &str = "auth";

const SESSION_ID_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
struct Session {
    token: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session holding `token` and return its id.
    pub async fn create(&self, token: String) -> String {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let id = Base64UrlUnpadded::encode_string(&bytes);

        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, session| session.expires_at > now);
        sessions.insert(
            id.clone(),
            Session {
                token,
                expires_at: now + self.ttl,
            },
        );
        id
    }

    /// Token stored in a live session. Expired sessions are dropped here.
    pub async fn get(&self, id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(id) {
            Some(session) if session.expires_at > Instant::now() => Some(session.token.clone()),
            Some(_) => {
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    /// Swap the token of a live session, e.g. after a refresh.
    pub async fn replace(&self, id: &str, token: String) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(session) if session.expires_at > Instant::now() => {
                session.token = token;
                true
            }
            _ => false,
        }
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }
}

fn mac(key: &[u8], id: &str) -> Option<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).ok()?;
    mac.update(id.as_bytes());
    Some(mac)
}

/// Cookie value for a session id, signed with the secret's current key.
#[must_use]
pub fn sign(secret: &Secret, id: &str) -> Option<String> {
    let signature = mac(secret.key().as_bytes(), id)?.finalize().into_bytes();
    Some(format!("{id}.{}", Base64UrlUnpadded::encode_string(&signature)))
}

/// Session id from a signed cookie value, if any usable key of the secret
/// produced the signature.
#[must_use]
pub fn unsign<'a>(secret: &Secret, value: &'a str) -> Option<&'a str> {
    let (id, signature) = value.rsplit_once('.')?;
    let signature = Base64UrlUnpadded::decode_vec(signature).ok()?;

    secret
        .verification_keys(unix_now())
        .any(|key| mac(key.as_bytes(), id).is_some_and(|mac| mac.verify_slice(&signature).is_ok()))
        .then_some(id)
}

/// Value of the named cookie, looking through every `Cookie` header.
#[must_use]
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Build an `HttpOnly` cookie.
///
/// # Errors
/// Returns an error if the value contains characters not allowed in a header.
pub fn build_cookie(
    name: &str,
    value: &str,
    max_age: Duration,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// # Errors
/// Returns an error if the name is not a valid header value.
pub fn clear_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(name, "", Duration::ZERO, secure)
}
