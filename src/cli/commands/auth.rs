use crate::{
    api::{AuthConfig, TokenSource},
    secrets::{MAX_SECRET_SIZE, MIN_SECRET_SIZE},
};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_SECRET_SIZE: &str = "secret-size";
pub const ARG_SECRET_EXPIRY: &str = "secret-expiry";
pub const ARG_MAX_PREVIOUS_KEYS: &str = "max-previous-keys";
pub const ARG_ADMIN_ROLE: &str = "admin-role";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_TOKEN_SOURCES: &str = "token-sources";

/// Parse auth arguments into the runtime configuration.
///
/// # Errors
/// Returns an error if a value is out of range.
pub fn parse(matches: &ArgMatches) -> anyhow::Result<AuthConfig> {
    let seconds = |id: &str| -> anyhow::Result<Duration> {
        let value = matches.get_one::<u64>(id).copied().unwrap_or(0);
        if value == 0 {
            anyhow::bail!("--{id} must be greater than zero");
        }
        Ok(Duration::from_secs(value))
    };

    let secret_size = matches
        .get_one::<usize>(ARG_SECRET_SIZE)
        .copied()
        .unwrap_or(crate::secrets::DEFAULT_SECRET_SIZE);
    if !(MIN_SECRET_SIZE..=MAX_SECRET_SIZE).contains(&secret_size) {
        anyhow::bail!(
            "--{ARG_SECRET_SIZE} must be between {MIN_SECRET_SIZE} and {MAX_SECRET_SIZE} bytes"
        );
    }

    let mut config = AuthConfig::default()
        .with_access_token_ttl(seconds(ARG_ACCESS_TOKEN_TTL)?)
        .with_refresh_token_ttl(seconds(ARG_REFRESH_TOKEN_TTL)?)
        .with_session_ttl(seconds(ARG_SESSION_TTL)?)
        .with_secret_size(secret_size)
        .with_secret_expiry(seconds(ARG_SECRET_EXPIRY)?)
        .with_max_previous_keys(
            matches
                .get_one::<usize>(ARG_MAX_PREVIOUS_KEYS)
                .copied()
                .unwrap_or(crate::secrets::DEFAULT_MAX_PREVIOUS_KEYS),
        )
        .with_cookie_secure(matches.get_flag(ARG_COOKIE_SECURE));

    if let Some(role) = matches
        .get_one::<String>(ARG_ADMIN_ROLE)
        .filter(|v| !v.trim().is_empty())
    {
        config = config.with_admin_role(role.trim());
    }

    if let Some(sources) = matches.get_one::<String>(ARG_TOKEN_SOURCES) {
        let sources = sources
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(TokenSource::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if sources.is_empty() {
            anyhow::bail!("--{ARG_TOKEN_SOURCES} must name at least one source");
        }
        config = config.with_token_sources(sources);
    }

    Ok(config)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token lifetime in seconds")
                .env("GATEHOUSE_ACCESS_TOKEN_TTL")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token lifetime in seconds")
                .env("GATEHOUSE_REFRESH_TOKEN_TTL")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Server-side session lifetime in seconds")
                .env("GATEHOUSE_SESSION_TTL")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SECRET_SIZE)
                .long(ARG_SECRET_SIZE)
                .help("Size in bytes of generated signing keys")
                .env("GATEHOUSE_SECRET_SIZE")
                .default_value("32")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_SECRET_EXPIRY)
                .long(ARG_SECRET_EXPIRY)
                .help("Seconds a rotated-out signing key keeps verifying tokens")
                .env("GATEHOUSE_SECRET_EXPIRY")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAX_PREVIOUS_KEYS)
                .long(ARG_MAX_PREVIOUS_KEYS)
                .help("Number of rotated-out keys kept per secret")
                .env("GATEHOUSE_MAX_PREVIOUS_KEYS")
                .default_value("3")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_ADMIN_ROLE)
                .long(ARG_ADMIN_ROLE)
                .help("Role required by the administrative routes")
                .env("GATEHOUSE_ADMIN_ROLE")
                .default_value("admin"),
        )
        .arg(
            Arg::new(ARG_TOKEN_SOURCES)
                .long(ARG_TOKEN_SOURCES)
                .help("Where to look for a token, in order: session, bearer, cookie:<name>")
                .env("GATEHOUSE_TOKEN_SOURCES")
                .default_value("session,bearer,cookie:auth"),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark cookies Secure (serve over HTTPS)")
                .env("GATEHOUSE_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
}
