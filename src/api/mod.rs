use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Json, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    response::IntoResponse,
    routing::get,
};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;

pub mod authorization;
pub mod error;
pub mod guard;
pub(crate) mod handlers;
pub mod session;
mod openapi;
mod state;


pub use self::authorization::{Principal, TokenSource};
pub use self::error::ApiError;
pub use self::guard::{InitGuard, InitState};
pub use self::openapi::openapi;
pub use self::state::{AuthConfig, AuthState};

const REQUEST_ID: &str = "x-request-id";

/// Build the application router.
///
/// Protected routes go through [`authorization::authorize`]; every route,
/// including unknown paths, goes through [`guard::require_initialized`].
#[must_use]
pub fn router(state: Arc<AuthState>) -> Router {
    let (public, _) = openapi::public_router().split_for_parts();
    let (protected, _) = openapi::protected_router().split_for_parts();

    let protected = protected.route_layer(middleware::from_fn_with_state(
        state.clone(),
        authorization::authorize,
    ));

    public
        .merge(protected)
        .route("/", get(handlers::root::root))
        .route("/robots.txt", get(handlers::root::robots))
        .route("/openapi.json", get(openapi_json))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_initialized,
        ))
        .layer(Extension(state))
}

async fn openapi_json() -> impl IntoResponse {
    Json(openapi())
}

async fn not_found() -> ApiError {
    ApiError::NotFound("not found".to_string())
}

/// Start the server
/// # Errors
/// Return error if the frontend origin is invalid or the listener fails
pub async fn new(
    port: u16,
    state: Arc<AuthState>,
    frontend_origin: Option<&str>,
    mut rx: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let cors = frontend_origin
        .map(|origin| {
            Ok::<_, anyhow::Error>(
                CorsLayer::new()
                    .allow_headers([CONTENT_TYPE, AUTHORIZATION])
                    .allow_methods([Method::GET, Method::POST])
                    .allow_origin(AllowOrigin::exact(cors_origin(origin)?))
                    .allow_credentials(true),
            )
        })
        .transpose()?;

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let app = match cors {
        Some(cors) => app.layer(cors),
        None => app,
    };

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = rx.recv() => {},
                _ = tokio::signal::ctrl_c() => {},
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn cors_origin(frontend_origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_origin)
        .with_context(|| format!("Invalid frontend origin: {frontend_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend origin must include a valid host: {frontend_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
