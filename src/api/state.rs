//! Shared request state and runtime auth configuration.

use crate::{
    api::{authorization::TokenSource, guard::InitGuard, session::SessionStore},
    dataplane::Dataplane,
    secrets::{
        DEFAULT_MAX_PREVIOUS_KEYS, DEFAULT_SECRET_EXPIRY_SECONDS, DEFAULT_SECRET_SIZE, SecretStore,
    },
    token::{DEFAULT_ACCESS_TOKEN_TTL, DEFAULT_REFRESH_TOKEN_TTL, TokenService},
};
use std::{sync::Arc, time::Duration};

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_ADMIN_ROLE: &str = "admin";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    session_ttl: Duration,
    secret_size: usize,
    secret_expiry: Duration,
    max_previous_keys: usize,
    admin_role: String,
    cookie_secure: bool,
    token_sources: Vec<TokenSource>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            session_ttl: DEFAULT_SESSION_TTL,
            secret_size: DEFAULT_SECRET_SIZE,
            secret_expiry: Duration::from_secs(DEFAULT_SECRET_EXPIRY_SECONDS),
            max_previous_keys: DEFAULT_MAX_PREVIOUS_KEYS,
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
            cookie_secure: false,
            token_sources: TokenSource::defaults(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_secret_size(mut self, size: usize) -> Self {
        self.secret_size = size;
        self
    }

    #[must_use]
    pub const fn with_secret_expiry(mut self, expiry: Duration) -> Self {
        self.secret_expiry = expiry;
        self
    }

    #[must_use]
    pub const fn with_max_previous_keys(mut self, max: usize) -> Self {
        self.max_previous_keys = max;
        self
    }

    #[must_use]
    pub fn with_admin_role(mut self, role: &str) -> Self {
        self.admin_role = role.to_string();
        self
    }

    #[must_use]
    pub const fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_token_sources(mut self, sources: Vec<TokenSource>) -> Self {
        self.token_sources = sources;
        self
    }

    #[must_use]
    pub const fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub const fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub const fn secret_size(&self) -> usize {
        self.secret_size
    }

    #[must_use]
    pub const fn secret_expiry(&self) -> Duration {
        self.secret_expiry
    }

    #[must_use]
    pub const fn max_previous_keys(&self) -> usize {
        self.max_previous_keys
    }

    #[must_use]
    pub fn admin_role(&self) -> &str {
        &self.admin_role
    }

    #[must_use]
    pub const fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn token_sources(&self) -> &[TokenSource] {
        &self.token_sources
    }
}

pub struct AuthState {
    config: AuthConfig,
    secrets: Arc<SecretStore>,
    tokens: TokenService,
    sessions: SessionStore,
    dataplane: Arc<dyn Dataplane>,
    guard: InitGuard,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        secrets: Arc<SecretStore>,
        dataplane: Arc<dyn Dataplane>,
        guard: InitGuard,
    ) -> Self {
        let tokens = TokenService::new(config.access_token_ttl(), config.refresh_token_ttl());
        let sessions = SessionStore::new(config.session_ttl());
        Self {
            config,
            secrets,
            tokens,
            sessions,
            dataplane,
            guard,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn dataplane(&self) -> &dyn Dataplane {
        self.dataplane.as_ref()
    }

    #[must_use]
    pub const fn guard(&self) -> &InitGuard {
        &self.guard
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("secrets", &self.secrets)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}
