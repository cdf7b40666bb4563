use base64ct::{Base64, Encoding};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use utoipa::ToSchema;

/// Raw key bytes. Serialized as standard base64, never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Generate `size` random bytes from the OS RNG.
    #[must_use]
    pub fn generate(size: usize) -> Self {
        let mut bytes = vec![0u8; size];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED; {} bytes])", self.0.len())
    }
}

impl Serialize for KeyMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(&self.0))
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = Base64::decode_vec(&encoded)
            .map_err(|_| serde::de::Error::custom("key material is not valid base64"))?;
        if bytes.is_empty() {
            return Err(serde::de::Error::custom("key material is empty"));
        }
        Ok(Self(bytes))
    }
}

/// A key that used to be current, kept so tokens it signed still verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousKey {
    pub key: KeyMaterial,
    /// Unix seconds when the key stopped being current.
    pub retired_at: i64,
}

/// A named signing secret as stored in the secret manager.
///
/// `exp` is the grace period (seconds) a retired key stays usable for
/// verification. `previous` is ordered newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    name: String,
    key: KeyMaterial,
    exp: u64,
    #[serde(default)]
    previous: Vec<PreviousKey>,
    #[serde(skip)]
    version: u64,
}

impl Secret {
    #[must_use]
    pub fn generate(name: &str, size: usize, exp: u64) -> Self {
        Self {
            name: name.to_string(),
            key: KeyMaterial::generate(size),
            exp,
            previous: Vec::new(),
            version: 0,
        }
    }

    /// Build a secret from known key material.
    #[must_use]
    pub fn with_key(name: &str, key: KeyMaterial, exp: u64) -> Self {
        Self {
            name: name.to_string(),
            key,
            exp,
            previous: Vec::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    #[must_use]
    pub const fn exp(&self) -> u64 {
        self.exp
    }

    #[must_use]
    pub fn previous(&self) -> &[PreviousKey] {
        &self.previous
    }

    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    fn retired_key_alive(&self, previous: &PreviousKey, now: i64) -> bool {
        let grace = i64::try_from(self.exp).unwrap_or(i64::MAX);
        previous.retired_at.saturating_add(grace) > now
    }

    /// Keys to try when verifying: the current key, then every previous key
    /// still inside its grace period, newest-first.
    pub fn verification_keys(&self, now: i64) -> impl Iterator<Item = &KeyMaterial> {
        std::iter::once(&self.key).chain(
            self.previous
                .iter()
                .filter(move |previous| self.retired_key_alive(previous, now))
                .map(|previous| &previous.key),
        )
    }

    /// Return the secret with `key` as the current key. The outgoing key is
    /// pushed to the front of `previous`; keys past their grace period are
    /// dropped and the list is capped at `max_previous`.
    #[must_use]
    pub fn rotated(&self, key: KeyMaterial, now: i64, max_previous: usize) -> Self {
        let mut previous = Vec::with_capacity(self.previous.len() + 1);
        previous.push(PreviousKey {
            key: self.key.clone(),
            retired_at: now,
        });
        previous.extend(self.previous.iter().cloned());
        previous.retain(|entry| self.retired_key_alive(entry, now));
        previous.truncate(max_previous);

        Self {
            name: self.name.clone(),
            key,
            exp: self.exp,
            previous,
            version: self.version,
        }
    }

    #[must_use]
    pub fn metadata(&self) -> SecretMetadata {
        SecretMetadata {
            name: self.name.clone(),
            size: self.key.len(),
            expiry_seconds: self.exp,
            previous_keys: self.previous.len(),
            version: self.version,
        }
    }
}

/// What the API is allowed to show about a secret.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SecretMetadata {
    pub name: String,
    pub size: usize,
    pub expiry_seconds: u64,
    pub previous_keys: usize,
    pub version: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn key_material_debug_is_redacted() {
        let key = KeyMaterial::from_bytes(b"super-secret".to_vec());
        let debug = format!("{key:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("12 bytes"));
    }

    #[test]
    fn secret_json_uses_base64_and_skips_version() {
        let secret = Secret::with_key("sessionkey", KeyMaterial::from_bytes(vec![1, 2, 3]), 60)
            .with_version(7);
        let json = serde_json::to_value(&secret).unwrap();
        assert_eq!(json["key"], "AQID");
        assert_eq!(json["exp"], 60);
        assert!(json.get("version").is_none());

        let back: Secret = serde_json::from_value(json).unwrap();
        assert_eq!(back.key().as_bytes(), &[1, 2, 3]);
        assert_eq!(back.version(), 0);
    }

    #[test]
    fn empty_key_is_rejected() {
        let result = serde_json::from_value::<Secret>(serde_json::json!({
            "name": "jwtsecretkey",
            "key": "",
            "exp": 60
        }));
        assert!(result.is_err());
    }

    #[test]
    fn rotation_keeps_outgoing_key_newest_first() {
        let secret = Secret::generate("jwtsecretkey", 32, 3600);
        let first = secret.key().clone();
        let rotated = secret.rotated(KeyMaterial::generate(32), 100, 3);
        let second = rotated.key().clone();
        let rotated = rotated.rotated(KeyMaterial::generate(32), 200, 3);

        assert_eq!(rotated.previous().len(), 2);
        assert_eq!(rotated.previous()[0].key, second);
        assert_eq!(rotated.previous()[1].key, first);
        assert_eq!(rotated.previous()[0].retired_at, 200);
    }

    #[test]
    fn rotation_is_bounded_by_count_and_expiry() {
        let mut secret = Secret::generate("jwtsecretkey", 16, 1000);
        for now in 1..=5 {
            secret = secret.rotated(KeyMaterial::generate(16), now, 2);
        }
        assert_eq!(secret.previous().len(), 2);

        let expired = secret.rotated(KeyMaterial::generate(16), 10_000, 2);
        assert_eq!(expired.previous().len(), 1);
        assert_eq!(expired.previous()[0].retired_at, 10_000);
    }

    #[test]
    fn verification_keys_skip_expired_previous_keys() {
        let secret = Secret::generate("jwtsecretkey", 16, 10);
        let rotated = secret.rotated(KeyMaterial::generate(16), 100, 3);

        assert_eq!(rotated.verification_keys(105).count(), 2);
        assert_eq!(rotated.verification_keys(110).count(), 1);
    }
}
