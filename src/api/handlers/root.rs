use crate::api::AuthState;
use axum::{Extension, response::IntoResponse};
use std::sync::Arc;

const ROBOTS: &str = "User-agent: *\nDisallow: /\n";

pub async fn root(state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    format!(
        "{} {} ({})\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        state.guard().state()
    )
}

pub async fn robots() -> &'static str {
    ROBOTS
}
