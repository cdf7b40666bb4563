use secrecy::SecretString;

/// Vault connection shared by the secret manager and the renewal loop.
#[derive(Clone)]
pub struct GlobalArgs {
    pub vault_url: String,
    pub vault_token: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(vurl: String) -> Self {
        Self {
            vault_url: vurl,
            vault_token: SecretString::default(),
        }
    }

    pub fn set_token(&mut self, token: SecretString) {
        self.vault_token = token;
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("vault_url", &self.vault_url)
            .field("vault_token", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let vurl = "https://localhost:8200".to_string();
        let args = GlobalArgs::new(vurl);
        assert_eq!(args.vault_url, "https://localhost:8200");
        assert_eq!(args.vault_token.expose_secret(), "");
    }

    #[test]
    fn test_debug_hides_token() {
        let mut args = GlobalArgs::new("https://localhost:8200".to_string());
        args.set_token(SecretString::from("s.very-secret".to_string()));
        let debug = format!("{args:?}");
        assert!(!debug.contains("s.very-secret"));
        assert!(debug.contains("***"));
    }
}
