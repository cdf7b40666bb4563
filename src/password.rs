//! Password hashing.
//!
//! Passwords are stored as Argon2id PHC strings (`$argon2id$v=19$...`), so the
//! salt and parameters travel with the hash and verification needs nothing else.
//! All of them are CPU bound; call them from `spawn_blocking` in async code.

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password must not be empty")]
    Empty,
    #[error("failed to hash password: {0}")]
    Hash(String),
}

/// Well-formed hash with the same parameters as [`hash`]; it matches no
/// password in practice.
const UNKNOWN_USER_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

fn argon2() -> Argon2<'static> {
    Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
}

/// Hash a plaintext password with a fresh random salt.
///
/// # Errors
/// Returns an error if the password is empty or Argon2 fails (e.g. allocation).
pub fn hash(plaintext: &SecretString) -> Result<String, PasswordError> {
    let plaintext = plaintext.expose_secret();
    if plaintext.is_empty() {
        return Err(PasswordError::Empty);
    }

    let salt = SaltString::generate(&mut OsRng);
    argon2()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| PasswordError::Hash(err.to_string()))
}

/// Check a plaintext password against a stored PHC string.
///
/// A mismatch and an unparsable stored hash both return `false`.
#[must_use]
pub fn verify(plaintext: &SecretString, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("Stored password hash is malformed: {err}");
            return false;
        }
    };

    argon2()
        .verify_password(plaintext.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

/// Do the work of one verification for a username that does not exist, so
/// the response time does not tell unknown users from wrong passwords.
pub fn verify_unknown_user(plaintext: &SecretString) {
    let _ = verify(plaintext, UNKNOWN_USER_HASH);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn hash_then_verify() {
        let hash = hash(&secret("password1")).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify(&secret("password1"), &hash));
    }

    #[test]
    fn wrong_password_does_not_verify() {
        let hash = hash(&secret("password1")).unwrap();
        assert!(!verify(&secret("password2"), &hash));
        assert!(!verify(&secret(""), &hash));
    }

    #[test]
    fn hash_never_equals_plaintext_and_is_salted() {
        let first = hash(&secret("password1")).unwrap();
        let second = hash(&secret("password1")).unwrap();
        assert_ne!(first, "password1");
        assert!(!first.contains("password1"));
        assert_ne!(first, second);
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(matches!(hash(&secret("")), Err(PasswordError::Empty)));
    }

    #[test]
    fn malformed_hash_is_false() {
        assert!(!verify(&secret("password1"), "not-a-phc-string"));
        assert!(!verify(&secret("password1"), ""));
    }

    #[test]
    fn unknown_user_hash_costs_a_real_verification() {
        let placeholder = PasswordHash::new(UNKNOWN_USER_HASH).unwrap();
        let stored = hash(&secret("password1")).unwrap();
        let real = PasswordHash::new(&stored).unwrap();

        assert_eq!(placeholder.algorithm, real.algorithm);
        assert_eq!(placeholder.version, real.version);
        assert_eq!(placeholder.params.to_string(), real.params.to_string());
        assert_eq!(
            placeholder.hash.map(|output| output.len()),
            real.hash.map(|output| output.len())
        );
        assert!(!verify(&secret("password1"), UNKNOWN_USER_HASH));
    }
}
