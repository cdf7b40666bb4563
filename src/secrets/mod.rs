//! Signing secret lifecycle.
//!
//! `SecretStore` fronts a [`SecretManager`] with an in-memory cache. Readers get
//! an `Arc<Secret>` snapshot; rotation builds the next snapshot and swaps it in
//! under the write lock, so a reader always holds either the old or the new
//! secret and both carry a usable key.

mod manager;
mod model;

pub use self::manager::{CreateOutcome, MemorySecretManager, SecretManager};
pub use self::model::{KeyMaterial, PreviousKey, Secret, SecretMetadata};

use crate::unix_now;
use regex::Regex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

pub const JWT_SECRET: &str = "jwtsecretkey";
pub const JWT_REFRESH_SECRET: &str = "jwtrefreshsecretkey";
pub const SESSION_SECRET: &str = "sessionkey";

/// Secrets every deployment needs; created during bootstrap.
pub const DEFAULT_SECRETS: [&str; 3] = [JWT_SECRET, JWT_REFRESH_SECRET, SESSION_SECRET];

pub const MIN_SECRET_SIZE: usize = 16;
pub const MAX_SECRET_SIZE: usize = 1024;
pub const DEFAULT_SECRET_SIZE: usize = 32;
pub const DEFAULT_SECRET_EXPIRY_SECONDS: u64 = 86_400;
pub const DEFAULT_MAX_PREVIOUS_KEYS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("invalid secret name: {0}")]
    InvalidName(String),
    #[error(
        "invalid secret size {size}: must be between {min} and {max} bytes",
        min = MIN_SECRET_SIZE,
        max = MAX_SECRET_SIZE
    )]
    InvalidSize { size: usize },
    #[error("secret {0} was modified concurrently, retry the operation")]
    Conflict(String),
    #[error("secret manager error: {0:#}")]
    Manager(#[from] anyhow::Error),
}

/// Secret names double as storage keys in the manager.
#[must_use]
pub fn valid_secret_name(name: &str) -> bool {
    Regex::new(r"^[a-z0-9_-]{1,64}$").is_ok_and(|re| re.is_match(name))
}

fn validate(name: &str, size: usize) -> Result<(), SecretError> {
    if !valid_secret_name(name) {
        return Err(SecretError::InvalidName(name.to_string()));
    }
    if !(MIN_SECRET_SIZE..=MAX_SECRET_SIZE).contains(&size) {
        return Err(SecretError::InvalidSize { size });
    }
    Ok(())
}

pub struct SecretStore {
    manager: Arc<dyn SecretManager>,
    cache: RwLock<HashMap<String, Arc<Secret>>>,
    rotation: Mutex<()>,
    max_previous: usize,
}

impl SecretStore {
    #[must_use]
    pub fn new(manager: Arc<dyn SecretManager>, max_previous: usize) -> Self {
        Self {
            manager,
            cache: RwLock::new(HashMap::new()),
            rotation: Mutex::new(()),
            max_previous,
        }
    }

    /// Populate the cache with every secret the manager holds.
    ///
    /// # Errors
    /// Returns an error if the manager cannot list or read its secrets.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<usize, SecretError> {
        let secrets = self.manager.retrieve_all().await?;
        let mut cache = self.cache.write().await;
        for secret in secrets {
            debug!("Loaded secret {}", secret.name());
            cache.insert(secret.name().to_string(), Arc::new(secret));
        }
        Ok(cache.len())
    }

    /// Fetch a secret, reading through to the manager on a cache miss.
    ///
    /// # Errors
    /// Returns `NotFound` if the manager has no secret with that name.
    pub async fn get(&self, name: &str) -> Result<Arc<Secret>, SecretError> {
        if let Some(secret) = self.cache.read().await.get(name) {
            return Ok(secret.clone());
        }

        let secret = self
            .manager
            .retrieve(name)
            .await?
            .ok_or_else(|| SecretError::NotFound(name.to_string()))?;

        Ok(self.remember(secret).await)
    }

    /// Return the named secret, creating it with `size` random bytes if it
    /// does not exist yet.
    ///
    /// Creation holds the same lock as [`rotate`](Self::rotate), so callers on
    /// this store never race each other. When another instance wins the race
    /// the stored secret is read back and returned, so every caller ends up
    /// with the same key material.
    ///
    /// # Errors
    /// Returns an error for an invalid name or size, or if the manager fails.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        name: &str,
        size: usize,
        expiry_seconds: u64,
    ) -> Result<Arc<Secret>, SecretError> {
        if let Some(secret) = self.cache.read().await.get(name) {
            return Ok(secret.clone());
        }
        validate(name, size)?;

        let _rotation = self.rotation.lock().await;
        // Another caller may have created it while we waited.
        if let Some(secret) = self.cache.read().await.get(name) {
            return Ok(secret.clone());
        }

        let secret = Secret::generate(name, size, expiry_seconds);
        match self.manager.create(&secret).await? {
            CreateOutcome::Created { version } => {
                info!("Created secret {name}");
                Ok(self.remember(secret.with_version(version)).await)
            }
            CreateOutcome::AlreadyExists => {
                debug!("Secret {name} already exists, using the stored one");
                let stored = self
                    .manager
                    .retrieve(name)
                    .await?
                    .ok_or_else(|| SecretError::Conflict(name.to_string()))?;
                Ok(self.remember(stored).await)
            }
        }
    }

    /// Replace the current key of a secret with fresh material of the same
    /// size. The outgoing key moves to the previous-keys list.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown secret and `Conflict` if another
    /// writer updated it in the meantime.
    #[instrument(skip(self))]
    pub async fn rotate(&self, name: &str) -> Result<Arc<Secret>, SecretError> {
        let _rotation = self.rotation.lock().await;

        // Start from the stored copy so a rotation done elsewhere is not lost.
        let current = self
            .manager
            .retrieve(name)
            .await?
            .ok_or_else(|| SecretError::NotFound(name.to_string()))?;

        let size = current.key().len().max(MIN_SECRET_SIZE);
        let next = current.rotated(KeyMaterial::generate(size), unix_now(), self.max_previous);
        let version = match self.manager.update(&next, current.version()).await {
            Ok(version) => version,
            Err(err) => {
                warn!("Failed to rotate secret {name}: {err}");
                return Err(err);
            }
        };

        let next = Arc::new(next.with_version(version));
        self.cache
            .write()
            .await
            .insert(name.to_string(), next.clone());

        info!(
            "Rotated secret {name} to version {version}, {} previous key(s) retained",
            next.previous().len()
        );

        Ok(next)
    }

    /// Names of the cached secrets, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Keep the newest of what is cached and what was just read.
    async fn remember(&self, secret: Secret) -> Arc<Secret> {
        let mut cache = self.cache.write().await;
        let entry = cache
            .entry(secret.name().to_string())
            .or_insert_with(|| Arc::new(secret.clone()));
        if entry.version() < secret.version() {
            *entry = Arc::new(secret);
        }
        entry.clone()
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("max_previous", &self.max_previous)
            .finish_non_exhaustive()
    }
}
