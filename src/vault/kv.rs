//! Vault KV v2 as the secret manager.
//!
//! Each signing secret is one KV entry at `{mount}/data/{path}/{name}`. Creates
//! are written with `cas = 0` (fail if the entry exists) and rotations with
//! `cas = <version read>`, so Vault arbitrates concurrent writers.

use crate::{
    cli::globals::GlobalArgs,
    secrets::{CreateOutcome, Secret, SecretError, SecretManager},
    vault,
};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{Instrument, debug, info_span, instrument};

#[derive(Debug)]
pub struct VaultKvManager {
    client: Client,
    vault_url: String,
    vault_token: SecretString,
    mount: String,
    path: String,
}

enum WriteOutcome {
    Written(u64),
    CasMismatch,
}

fn is_cas_mismatch(json_response: &Value) -> bool {
    vault::vault_error_message(json_response).contains("check-and-set")
}

impl VaultKvManager {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(globals: &GlobalArgs, mount: &str, path: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: vault::client()?,
            vault_url: globals.vault_url.clone(),
            vault_token: globals.vault_token.clone(),
            mount: mount.trim_matches('/').to_string(),
            path: path.trim_matches('/').to_string(),
        })
    }

    fn data_url(&self, name: &str) -> anyhow::Result<String> {
        vault::endpoint_url(
            &self.vault_url,
            &format!("/v1/{}/data/{}/{name}", self.mount, self.path),
        )
    }

    fn metadata_url(&self) -> anyhow::Result<String> {
        vault::endpoint_url(
            &self.vault_url,
            &format!("/v1/{}/metadata/{}", self.mount, self.path),
        )
    }

    async fn read(&self, name: &str) -> anyhow::Result<Option<Secret>> {
        let url = self.data_url(name)?;
        let span = info_span!("vault.kv.read", http.method = "GET", url = %url);
        let response = self
            .client
            .get(&url)
            .header(vault::VAULT_TOKEN_HEADER, self.vault_token.expose_secret())
            .send()
            .instrument(span)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or_default();
            return Err(anyhow!(
                "vault kv read failed: {status} {}",
                vault::vault_error_message(&json_response)
            ));
        }

        let mut json_response: Value = response.json().await?;
        let version = json_response
            .pointer("/data/metadata/version")
            .and_then(Value::as_u64)
            .context("kv metadata version missing from vault response")?;
        let data = json_response
            .pointer_mut("/data/data")
            .map(Value::take)
            .filter(|data| !data.is_null())
            .context("kv data missing from vault response")?;

        let secret: Secret = serde_json::from_value(data)
            .with_context(|| format!("secret {name} stored in vault is malformed"))?;

        Ok(Some(secret.with_version(version)))
    }

    async fn list(&self) -> anyhow::Result<Vec<String>> {
        let url = self.metadata_url()?;
        let span = info_span!("vault.kv.list", http.method = "LIST", url = %url);
        let method = Method::from_bytes(b"LIST").context("invalid LIST method")?;
        let response = self
            .client
            .request(method, &url)
            .header(vault::VAULT_TOKEN_HEADER, self.vault_token.expose_secret())
            .send()
            .instrument(span)
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or_default();
            return Err(anyhow!(
                "vault kv list failed: {status} {}",
                vault::vault_error_message(&json_response)
            ));
        }

        let json_response: Value = response.json().await?;
        let keys = json_response
            .pointer("/data/keys")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    // Trailing slash marks a sub-folder, not a secret.
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(keys)
    }

    async fn write(&self, secret: &Secret, cas: u64) -> anyhow::Result<WriteOutcome> {
        let url = self.data_url(secret.name())?;
        let payload = json!({
            "options": { "cas": cas },
            "data": secret,
        });

        let span = info_span!("vault.kv.write", http.method = "POST", url = %url, cas);
        let response = self
            .client
            .post(&url)
            .header(vault::VAULT_TOKEN_HEADER, self.vault_token.expose_secret())
            .json(&payload)
            .send()
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST && is_cas_mismatch(&json_response) {
                debug!("check-and-set mismatch writing {}", secret.name());
                return Ok(WriteOutcome::CasMismatch);
            }
            return Err(anyhow!(
                "vault kv write failed: {status} {}",
                vault::vault_error_message(&json_response)
            ));
        }

        let json_response: Value = response.json().await?;
        let version = json_response
            .pointer("/data/version")
            .and_then(Value::as_u64)
            .context("kv version missing from vault write response")?;

        Ok(WriteOutcome::Written(version))
    }
}

#[async_trait]
impl SecretManager for VaultKvManager {
    #[instrument(skip(self))]
    async fn retrieve(&self, name: &str) -> Result<Option<Secret>, SecretError> {
        Ok(self.read(name).await?)
    }

    #[instrument(skip(self))]
    async fn retrieve_all(&self) -> Result<Vec<Secret>, SecretError> {
        let mut secrets = Vec::new();
        for name in self.list().await? {
            if let Some(secret) = self.read(&name).await? {
                secrets.push(secret);
            }
        }
        Ok(secrets)
    }

    #[instrument(skip(self, secret), fields(name = secret.name()))]
    async fn create(&self, secret: &Secret) -> Result<CreateOutcome, SecretError> {
        match self.write(secret, 0).await? {
            WriteOutcome::Written(version) => Ok(CreateOutcome::Created { version }),
            WriteOutcome::CasMismatch => Ok(CreateOutcome::AlreadyExists),
        }
    }

    #[instrument(skip(self, secret), fields(name = secret.name()))]
    async fn update(&self, secret: &Secret, expected_version: u64) -> Result<u64, SecretError> {
        match self.write(secret, expected_version).await? {
            WriteOutcome::Written(version) => Ok(version),
            WriteOutcome::CasMismatch => Err(SecretError::Conflict(secret.name().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::KeyMaterial;
    use anyhow::{Result, bail};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use crate::vault::testing::mock_vault;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(server: &MockServer) -> Result<VaultKvManager> {
        let mut globals = GlobalArgs::new(server.uri());
        globals.set_token(SecretString::from("vault-token".to_string()));
        VaultKvManager::new(&globals, "secret", "gatehouse")
    }

    fn stored_body(version: u64) -> Value {
        json!({
            "data": {
                "data": {
                    "name": "jwtsecretkey",
                    "key": "AAECAwQFBgcICQoLDA0ODw==",
                    "exp": 3600,
                    "previous": []
                },
                "metadata": { "version": version }
            }
        })
    }

    #[tokio::test]
    async fn retrieve_reads_data_and_version() -> Result<()> {
        let Some(server) = mock_vault().await else {
            return Ok(());
        };

        Mock::given(method("GET"))
            .and(path("/v1/secret/data/gatehouse/jwtsecretkey"))
            .and(header("X-Vault-Token", "vault-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_body(4)))
            .mount(&server)
            .await;

        let Some(secret) = manager(&server)?.retrieve("jwtsecretkey").await? else {
            bail!("expected a secret");
        };
        assert_eq!(secret.name(), "jwtsecretkey");
        assert_eq!(secret.key().len(), 16);
        assert_eq!(secret.version(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn retrieve_missing_is_none() -> Result<()> {
        let Some(server) = mock_vault().await else {
            return Ok(());
        };

        Mock::given(method("GET"))
            .and(path("/v1/secret/data/gatehouse/sessionkey"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
            .mount(&server)
            .await;

        assert!(manager(&server)?.retrieve("sessionkey").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn retrieve_all_lists_then_reads() -> Result<()> {
        let Some(server) = mock_vault().await else {
            return Ok(());
        };

        Mock::given(method("LIST"))
            .and(path("/v1/secret/metadata/gatehouse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "keys": ["jwtsecretkey", "nested/"] }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/secret/data/gatehouse/jwtsecretkey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_body(1)))
            .mount(&server)
            .await;

        let secrets = manager(&server)?.retrieve_all().await?;
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].name(), "jwtsecretkey");
        Ok(())
    }

    #[tokio::test]
    async fn create_uses_cas_zero() -> Result<()> {
        let Some(server) = mock_vault().await else {
            return Ok(());
        };

        Mock::given(method("POST"))
            .and(path("/v1/secret/data/gatehouse/sessionkey"))
            .and(body_partial_json(json!({ "options": { "cas": 0 } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "version": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let secret = Secret::with_key("sessionkey", KeyMaterial::generate(16), 60);
        let outcome = manager(&server)?.create(&secret).await?;
        assert_eq!(outcome, CreateOutcome::Created { version: 1 });
        Ok(())
    }

    #[tokio::test]
    async fn create_existing_is_already_exists() -> Result<()> {
        let Some(server) = mock_vault().await else {
            return Ok(());
        };

        Mock::given(method("POST"))
            .and(path("/v1/secret/data/gatehouse/sessionkey"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["check-and-set parameter did not match the current version"]
            })))
            .mount(&server)
            .await;

        let secret = Secret::with_key("sessionkey", KeyMaterial::generate(16), 60);
        let outcome = manager(&server)?.create(&secret).await?;
        assert_eq!(outcome, CreateOutcome::AlreadyExists);
        Ok(())
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() -> Result<()> {
        let Some(server) = mock_vault().await else {
            return Ok(());
        };

        Mock::given(method("POST"))
            .and(path("/v1/secret/data/gatehouse/jwtsecretkey"))
            .and(body_partial_json(json!({ "options": { "cas": 3 } })))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["check-and-set parameter did not match the current version"]
            })))
            .mount(&server)
            .await;

        let secret = Secret::with_key("jwtsecretkey", KeyMaterial::generate(16), 60);
        let result = manager(&server)?.update(&secret, 3).await;
        assert!(matches!(result, Err(SecretError::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_are_manager_errors() -> Result<()> {
        let Some(server) = mock_vault().await else {
            return Ok(());
        };

        Mock::given(method("GET"))
            .and(path("/v1/secret/data/gatehouse/jwtsecretkey"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "errors": ["permission denied"]
            })))
            .mount(&server)
            .await;

        let result = manager(&server)?.retrieve("jwtsecretkey").await;
        match result {
            Err(SecretError::Manager(err)) => {
                assert!(err.to_string().contains("permission denied"));
                Ok(())
            }
            other => bail!("expected manager error, got {other:?}"),
        }
    }
}
