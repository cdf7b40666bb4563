//! Map parsed arguments to the action to run.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_FRONTEND_ORIGIN, ARG_PORT, ARG_WORKING_DIR, auth, vault};
use anyhow::Result;
use std::path::PathBuf;

/// # Errors
/// Returns an error if arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let working_dir = PathBuf::from(get_non_empty(ARG_WORKING_DIR).unwrap_or_else(|| ".".to_string()));

    Ok(Action::Server(Args {
        port,
        dsn: get_non_empty(ARG_DSN),
        working_dir,
        frontend_origin: get_non_empty(ARG_FRONTEND_ORIGIN),
        auth: auth::parse(matches)?,
        vault: vault::Options::parse(matches)?,
    }))
}
