//! Vault HTTP client: `AppRole` login, secret-id unwrap, token renewal and the
//! KV v2 secret manager.

pub mod kv;
pub mod renew;

use crate::APP_USER_AGENT;
use anyhow::{Result, anyhow};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{Instrument, Span, debug, info_span, instrument};
use url::Url;

pub(crate) const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Used when a login response does not say how long the token lives.
const DEFAULT_LEASE_SECONDS: u64 = 1800;

pub(crate) fn vault_error_message(json_response: &Value) -> &str {
    json_response
        .get("errors")
        .and_then(|v| v.get(0))
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub(crate) fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(APP_USER_AGENT).build()?)
}

/// Build `scheme://host:port{path}` from a Vault base URL.
///
/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

/// `AppRole` login endpoint for a Vault base URL.
///
/// # Errors
/// Returns an error if the base URL is invalid.
pub fn approle_login_url(url: &str) -> Result<String> {
    endpoint_url(url, "/v1/auth/approle/login")
}

/// POST to Vault and return the JSON body. Non-2xx answers become errors
/// carrying Vault's first error message.
async fn post(
    url: &str,
    token: Option<&str>,
    payload: Option<&Value>,
    span: Span,
) -> Result<Value> {
    let mut request = client()?.post(url);
    if let Some(token) = token {
        request = request.header(VAULT_TOKEN_HEADER, token);
    }
    if let Some(payload) = payload {
        request = request.json(payload);
    }

    let response = request.send().instrument(span).await?;
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or_default();
        return Err(anyhow!("{url} - {status}, {}", vault_error_message(&body)));
    }

    Ok(response.json().await?)
}

fn auth_field<'a>(body: &'a Value, field: &str) -> Option<&'a Value> {
    body.get("auth").and_then(|auth| auth.get(field))
}

/// Unwrap a wrapped secret-id.
/// Create one with:
/// vault write -wrap-ttl=300s -f auth/approle/role/gatehouse/secret-id
/// # Errors
/// Returns an error if the Vault request fails or the response has no `secret_id`.
#[instrument(skip(token))]
pub async fn unwrap(url: &str, token: &str) -> Result<String> {
    let unwrap_url = endpoint_url(url, "/v1/sys/wrapping/unwrap")?;
    let span = info_span!("vault.unwrap", http.method = "POST", url = %unwrap_url);

    let body = post(&unwrap_url, Some(token), None, span).await?;

    body.get("data")
        .and_then(|data| data.get("secret_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))
}

/// Login to Vault using `AppRole`, returning the client token and its lease.
/// # Errors
/// Returns an error if the Vault request fails or the response has no `client_token`.
#[instrument(skip(sid))]
pub async fn approle_login(url: &str, sid: &str, rid: &str) -> Result<(String, u64)> {
    let span = info_span!("vault.approle_login", http.method = "POST", url = %url);
    let payload = json!({ "role_id": rid, "secret_id": sid });

    let body = post(url, None, Some(&payload), span).await?;

    let token = auth_field(&body, "client_token")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = auth_field(&body, "lease_duration")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_LEASE_SECONDS);

    Ok((token.to_string(), lease_duration))
}

/// Renew the current Vault token, returning the new lease duration.
/// # Errors
/// Returns an error if the Vault request fails or the response has no `lease_duration`.
#[instrument(skip(token))]
pub async fn renew_token(url: &str, token: &SecretString, increment: Option<u64>) -> Result<u64> {
    let renew_url = endpoint_url(url, "/v1/auth/token/renew-self")?;
    let span = info_span!("vault.renew_token", http.method = "POST", url = %renew_url);
    let payload = json!({ "increment": increment.unwrap_or(0) });

    let body = post(&renew_url, Some(token.expose_secret()), Some(&payload), span).await?;

    auth_field(&body, "lease_duration")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

#[cfg(test)]
pub(crate) mod testing {
    use wiremock::MockServer;

    /// A mock Vault, or `None` where the sandbox forbids binding localhost.
    pub(crate) async fn mock_vault() -> Option<MockServer> {
        if std::net::TcpListener::bind("127.0.0.1:0").is_err() {
            eprintln!("Skipping test: cannot bind localhost");
            return None;
        }
        Some(MockServer::start().await)
    }
}
