//! Initialization gate.
//!
//! The service starts `Uninitialized` unless `<working_dir>/auth.init` exists.
//! While uninitialized only the bootstrap routes are served; once the marker
//! is written the bootstrap routes close for good and everything else opens.

use crate::{api::AuthState, api::error::ApiError, unix_now};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info};
use utoipa::ToSchema;

pub const MARKER_FILE: &str = "auth.init";

pub const NOT_INITIALIZED: &str =
    "the service has not been initialized. please initialize to use the service";
pub const ALREADY_INITIALIZED: &str =
    "the service has already been initialized, contact an administrator for credentials";

/// The only routes served while uninitialized, and the only ones closed after.
const BOOTSTRAP_PATHS: [&str; 2] = ["/init", "/enroll"];

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InitState {
    Uninitialized,
    Initialized,
}

impl fmt::Display for InitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Initialized => f.write_str("initialized"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("{msg}", msg = ALREADY_INITIALIZED)]
    AlreadyInitialized,
    #[error("failed to write initialization marker: {0}")]
    Marker(#[from] std::io::Error),
}

#[derive(Serialize)]
struct Marker {
    initialized_at: i64,
    version: &'static str,
}

#[derive(Debug)]
pub struct InitGuard {
    marker: PathBuf,
    initialized: AtomicBool,
    bootstrap: Mutex<()>,
}

impl InitGuard {
    #[must_use]
    pub fn new(working_dir: &Path) -> Self {
        let marker = working_dir.join(MARKER_FILE);
        let initialized = marker.exists();
        debug!(
            "Initialization marker {} {}",
            marker.display(),
            if initialized { "found" } else { "not found" }
        );

        Self {
            marker,
            initialized: AtomicBool::new(initialized),
            bootstrap: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> InitState {
        if self.is_initialized() {
            InitState::Initialized
        } else {
            InitState::Uninitialized
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Take the bootstrap lock. Concurrent callers wait; whoever gets the lock
    /// after a successful bootstrap sees `AlreadyInitialized`.
    ///
    /// # Errors
    /// Returns `AlreadyInitialized` once the marker exists.
    pub async fn begin(&self) -> Result<BootstrapPermit<'_>, GuardError> {
        let lock = self.bootstrap.lock().await;

        // Another process sharing the working directory may have finished first.
        if self.is_initialized() || self.marker.exists() {
            self.initialized.store(true, Ordering::Release);
            return Err(GuardError::AlreadyInitialized);
        }

        Ok(BootstrapPermit {
            guard: self,
            _lock: lock,
        })
    }
}

/// Held for the duration of one bootstrap. Dropping it without calling
/// [`BootstrapPermit::complete`] leaves the service uninitialized.
#[derive(Debug)]
pub struct BootstrapPermit<'a> {
    guard: &'a InitGuard,
    _lock: MutexGuard<'a, ()>,
}

impl BootstrapPermit<'_> {
    /// Persist the marker and open the service.
    ///
    /// # Errors
    /// Returns an error if the marker cannot be written.
    pub async fn complete(self) -> Result<(), GuardError> {
        let body = serde_json::to_vec(&Marker {
            initialized_at: unix_now(),
            version: env!("CARGO_PKG_VERSION"),
        })
        .map_err(std::io::Error::from)?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.guard.marker)
            .await
        {
            Ok(mut file) => {
                file.write_all(&body).await?;
                file.sync_all().await?;
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!("Initialization marker already present");
            }
            Err(err) => return Err(err.into()),
        }

        self.guard.initialized.store(true, Ordering::Release);
        info!("Service initialized, marker written to {}", self.guard.marker.display());

        Ok(())
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// Reject requests that do not fit the current initialization state.
pub async fn require_initialized(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = normalize(request.uri().path());
    let bootstrap = BOOTSTRAP_PATHS.contains(&path);
    match (state.guard().state(), bootstrap) {
        (InitState::Uninitialized, false) => {
            debug!("Rejecting {path}: service not initialized");
            ApiError::Unauthorized(NOT_INITIALIZED.to_string()).into_response()
        }
        (InitState::Initialized, true) => {
            debug!("Rejecting {path}: service already initialized");
            ApiError::Unauthorized(ALREADY_INITIALIZED.to_string()).into_response()
        }
        _ => next.run(request).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn state_reads_back_from_json() {
        let json = serde_json::to_string(&InitState::Initialized).unwrap();
        assert_eq!(
            serde_json::from_str::<InitState>(&json).unwrap(),
            InitState::Initialized
        );
    }

    #[tokio::test]
    async fn starts_uninitialized_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let guard = InitGuard::new(dir.path());
        assert_eq!(guard.state(), InitState::Uninitialized);
        assert_eq!(guard.marker(), dir.path().join(MARKER_FILE));
    }

    #[tokio::test]
    async fn complete_writes_marker_and_closes_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let guard = InitGuard::new(dir.path());

        guard.begin().await.unwrap().complete().await.unwrap();
        assert_eq!(guard.state(), InitState::Initialized);

        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(guard.marker()).unwrap()).unwrap();
        assert!(body["initialized_at"].as_i64().unwrap() > 0);

        assert!(matches!(
            guard.begin().await,
            Err(GuardError::AlreadyInitialized)
        ));

        // A restart picks the state up from disk.
        assert_eq!(InitGuard::new(dir.path()).state(), InitState::Initialized);
    }

    #[tokio::test]
    async fn dropped_permit_leaves_service_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let guard = InitGuard::new(dir.path());

        drop(guard.begin().await.unwrap());
        assert_eq!(guard.state(), InitState::Uninitialized);
        assert!(guard.begin().await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_bootstrap_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let guard = Arc::new(InitGuard::new(dir.path()));

        let permit = guard.begin().await.unwrap();

        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move { guard.begin().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        permit.complete().await.unwrap();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(GuardError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn marker_written_elsewhere_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let guard = InitGuard::new(dir.path());
        std::fs::write(dir.path().join(MARKER_FILE), b"{}").unwrap();

        assert!(matches!(
            guard.begin().await,
            Err(GuardError::AlreadyInitialized)
        ));
        assert_eq!(guard.state(), InitState::Initialized);
    }

    #[test]
    fn normalize_trims_trailing_slash() {
        assert_eq!(normalize("/init/"), "/init");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/users"), "/users");
    }
}
