use crate::{
    GIT_COMMIT_HASH,
    api::{AuthState, InitState},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

const X_APP: &str = "X-App";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    dataplane: String,
    state: InitState,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Dataplane is reachable", body = Health),
        (status = 503, description = "Dataplane is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let ping_span = info_span!("dataplane.ping", db.operation = "PING");
    let reachable = match state.dataplane().ping().instrument(ping_span).await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping dataplane: {err}");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dataplane: if reachable { "ok" } else { "error" }.to_string(),
        state: state.guard().state(),
    };

    let mut headers = HeaderMap::new();
    match x_app(&health).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {value:?}");
            headers.insert(X_APP, value);
        }
        Err(err) => error!("Failed to parse X-App header: {err}"),
    }

    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, Json(health))
}

/// `name:version:short-commit`; the commit part is empty for unknown builds.
fn x_app(health: &Health) -> String {
    let short_hash = health.commit.get(..7).filter(|_| health.commit.len() > 7);
    format!(
        "{}:{}:{}",
        health.name,
        health.version,
        short_hash.unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(commit: &str) -> Health {
        Health {
            commit: commit.to_string(),
            name: "gatehouse".to_string(),
            version: "0.1.0".to_string(),
            dataplane: "ok".to_string(),
            state: InitState::Initialized,
        }
    }

    #[test]
    fn x_app_shortens_commit() {
        assert_eq!(x_app(&health("0123456789abcdef")), "gatehouse:0.1.0:0123456");
        assert_eq!(x_app(&health("unknown")), "gatehouse:0.1.0:");
    }
}
