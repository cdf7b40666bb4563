use super::{Secret, SecretError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Result of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { version: u64 },
    AlreadyExists,
}

/// Durable home of the signing secrets.
///
/// `create` must never overwrite an existing secret, and `update` must only
/// succeed when the stored version still equals `expected_version`. Those two
/// guarantees are what keep concurrent creators and rotators from diverging.
#[async_trait]
pub trait SecretManager: Send + Sync {
    async fn retrieve(&self, name: &str) -> Result<Option<Secret>, SecretError>;

    async fn retrieve_all(&self) -> Result<Vec<Secret>, SecretError>;

    async fn create(&self, secret: &Secret) -> Result<CreateOutcome, SecretError>;

    async fn update(&self, secret: &Secret, expected_version: u64) -> Result<u64, SecretError>;
}

/// Process-local secret manager, for development and tests.
#[derive(Debug, Default)]
pub struct MemorySecretManager {
    secrets: Mutex<HashMap<String, Secret>>,
}

impl MemorySecretManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretManager for MemorySecretManager {
    async fn retrieve(&self, name: &str) -> Result<Option<Secret>, SecretError> {
        Ok(self.secrets.lock().await.get(name).cloned())
    }

    async fn retrieve_all(&self) -> Result<Vec<Secret>, SecretError> {
        Ok(self.secrets.lock().await.values().cloned().collect())
    }

    async fn create(&self, secret: &Secret) -> Result<CreateOutcome, SecretError> {
        let mut secrets = self.secrets.lock().await;
        if secrets.contains_key(secret.name()) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        secrets.insert(secret.name().to_string(), secret.clone().with_version(1));
        Ok(CreateOutcome::Created { version: 1 })
    }

    async fn update(&self, secret: &Secret, expected_version: u64) -> Result<u64, SecretError> {
        let mut secrets = self.secrets.lock().await;
        let current = secrets
            .get(secret.name())
            .ok_or_else(|| SecretError::NotFound(secret.name().to_string()))?;
        if current.version() != expected_version {
            return Err(SecretError::Conflict(secret.name().to_string()));
        }
        let version = expected_version + 1;
        secrets.insert(
            secret.name().to_string(),
            secret.clone().with_version(version),
        );
        Ok(version)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_never_overwrites() {
        let manager = MemorySecretManager::new();
        let first = Secret::generate("sessionkey", 16, 60);
        let second = Secret::generate("sessionkey", 16, 60);

        assert_eq!(
            manager.create(&first).await.unwrap(),
            CreateOutcome::Created { version: 1 }
        );
        assert_eq!(
            manager.create(&second).await.unwrap(),
            CreateOutcome::AlreadyExists
        );

        let stored = manager.retrieve("sessionkey").await.unwrap().unwrap();
        assert_eq!(stored.key(), first.key());
    }

    #[tokio::test]
    async fn update_checks_version() {
        let manager = MemorySecretManager::new();
        let secret = Secret::generate("jwtsecretkey", 16, 60);
        manager.create(&secret).await.unwrap();

        assert_eq!(manager.update(&secret, 1).await.unwrap(), 2);
        assert!(matches!(
            manager.update(&secret, 1).await,
            Err(SecretError::Conflict(_))
        ));
        assert!(matches!(
            manager
                .update(&Secret::generate("missing", 16, 60), 1)
                .await,
            Err(SecretError::NotFound(_))
        ));
    }
}
