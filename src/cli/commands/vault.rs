use clap::{Arg, ArgGroup, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_VAULT_URL: &str = "vault-url";
pub const ARG_VAULT_TOKEN: &str = "vault-token";
pub const ARG_VAULT_ROLE_ID: &str = "vault-role-id";
pub const ARG_VAULT_SECRET_ID: &str = "vault-secret-id";
pub const ARG_VAULT_WRAPPED_TOKEN: &str = "vault-wrapped-token";
pub const ARG_VAULT_KV_MOUNT: &str = "vault-kv-mount";
pub const ARG_VAULT_KV_PATH: &str = "vault-kv-path";

/// How the service logs in to Vault.
#[derive(Debug, Clone)]
pub enum VaultAuth {
    /// A token handed over as is. Not renewed.
    Token(SecretString),
    AppRole {
        role_id: String,
        secret_id: Option<String>,
        wrapped_token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub auth: VaultAuth,
    pub kv_mount: String,
    pub kv_path: String,
}

impl Options {
    /// Parse Vault arguments. Returns `None` when no `--vault-url` is given.
    ///
    /// # Errors
    /// Returns an error if a URL is given without any way to log in.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Option<Self>> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let Some(url) = get_non_empty(ARG_VAULT_URL) else {
            return Ok(None);
        };

        let auth = if let Some(token) = get_non_empty(ARG_VAULT_TOKEN) {
            VaultAuth::Token(SecretString::from(token))
        } else {
            let Some(role_id) = get_non_empty(ARG_VAULT_ROLE_ID) else {
                anyhow::bail!(
                    "missing required argument: --{ARG_VAULT_TOKEN} or --{ARG_VAULT_ROLE_ID}"
                );
            };
            let secret_id = get_non_empty(ARG_VAULT_SECRET_ID);
            let wrapped_token = get_non_empty(ARG_VAULT_WRAPPED_TOKEN);
            if secret_id.is_none() && wrapped_token.is_none() {
                anyhow::bail!(
                    "missing required argument: --{ARG_VAULT_SECRET_ID} or --{ARG_VAULT_WRAPPED_TOKEN}"
                );
            }
            VaultAuth::AppRole {
                role_id,
                secret_id,
                wrapped_token,
            }
        };

        Ok(Some(Self {
            url,
            auth,
            kv_mount: get_non_empty(ARG_VAULT_KV_MOUNT).unwrap_or_else(|| "secret".to_string()),
            kv_path: get_non_empty(ARG_VAULT_KV_PATH).unwrap_or_else(|| "gatehouse".to_string()),
        }))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VAULT_URL)
                .long(ARG_VAULT_URL)
                .help("Vault base URL, example: https://vault.tld:8200 (signing secrets stay in memory if omitted)")
                .env("GATEHOUSE_VAULT_URL"),
        )
        .arg(
            Arg::new(ARG_VAULT_TOKEN)
                .long(ARG_VAULT_TOKEN)
                .help("Vault token, used instead of AppRole login")
                .env("GATEHOUSE_VAULT_TOKEN")
                .hide_env_values(true)
                .conflicts_with_all([ARG_VAULT_ROLE_ID, ARG_VAULT_SECRET_ID, ARG_VAULT_WRAPPED_TOKEN]),
        )
        .arg(
            Arg::new(ARG_VAULT_ROLE_ID)
                .long(ARG_VAULT_ROLE_ID)
                .help("Vault AppRole role id")
                .env("GATEHOUSE_VAULT_ROLE_ID"),
        )
        .arg(
            Arg::new(ARG_VAULT_SECRET_ID)
                .long(ARG_VAULT_SECRET_ID)
                .help("Vault AppRole secret id")
                .env("GATEHOUSE_VAULT_SECRET_ID")
                .hide_env_values(true)
                .conflicts_with(ARG_VAULT_WRAPPED_TOKEN),
        )
        .arg(
            Arg::new(ARG_VAULT_WRAPPED_TOKEN)
                .long(ARG_VAULT_WRAPPED_TOKEN)
                .help("Vault wrapped secret id")
                .env("GATEHOUSE_VAULT_WRAPPED_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_MOUNT)
                .long(ARG_VAULT_KV_MOUNT)
                .help("Vault KV-v2 mount holding the signing secrets")
                .env("GATEHOUSE_VAULT_KV_MOUNT")
                .default_value("secret"),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_PATH)
                .long(ARG_VAULT_KV_PATH)
                .help("Path below the KV-v2 mount where signing secrets are stored")
                .env("GATEHOUSE_VAULT_KV_PATH")
                .default_value("gatehouse"),
        )
        .group(
            ArgGroup::new("vault-auth")
                .args([ARG_VAULT_ROLE_ID, ARG_VAULT_SECRET_ID, ARG_VAULT_WRAPPED_TOKEN])
                .multiple(true),
        )
}
