//! # Gatehouse (Authentication & Secret Lifecycle)
//!
//! `gatehouse` is a small identity service. It owns four things:
//!
//! 1. **Bootstrap:** a one-time `/init` (or `/enroll`) call seeds the first role,
//!    user and signing secrets. Until that happens every other route answers `401`.
//! 2. **Credentials:** passwords are stored as Argon2id PHC strings and checked on
//!    `/authenticate`, which mints a short-lived access token and a refresh token.
//! 3. **Signing secrets:** named keys (`jwtsecretkey`, `jwtrefreshsecretkey`,
//!    `sessionkey`) live in an external secret manager (Vault KV v2) and are cached
//!    in memory. Rotation keeps the outgoing key so tokens signed just before a
//!    rotation keep verifying until they expire.
//! 4. **Authorization:** protected routes look for a token in the server-side
//!    session, the `Authorization: Bearer` header or the `auth` cookie, in that order.
//!
//! ## Storage
//!
//! Users and roles are JSON documents in a keyed store (the "dataplane"). With
//! `--dsn` the store is the `documents` table in `PostgreSQL` (see
//! `sql/schema.sql`); without it everything stays in memory, which is only meant
//! for development.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod cli;
pub mod dataplane;
pub mod model;
pub mod password;
pub mod secrets;
pub mod token;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Current time as unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with("gatehouse/"));
        assert!(APP_USER_AGENT.ends_with(env!("CARGO_PKG_VERSION")));
    }
}
