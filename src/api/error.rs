use crate::{
    api::guard::GuardError, dataplane::DataplaneError, password::PasswordError,
    secrets::SecretError, token::TokenError,
};
use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

pub const INVALID_CREDENTIALS: &str = "username or password is incorrect";

/// Body of every non-2xx JSON response.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn credentials() -> Self {
        Self::Unauthorized(INVALID_CREDENTIALS.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<SecretError> for ApiError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::NotFound(_) => Self::NotFound(err.to_string()),
            SecretError::InvalidName(_) | SecretError::InvalidSize { .. } => {
                Self::BadRequest(err.to_string())
            }
            SecretError::Conflict(_) => Self::Conflict(err.to_string()),
            SecretError::Manager(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<DataplaneError> for ApiError {
    fn from(err: DataplaneError) -> Self {
        match err {
            DataplaneError::Conflict { .. } => Self::Conflict(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::AlreadyInitialized => Self::Unauthorized(err.to_string()),
            GuardError::Marker(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::Empty => Self::BadRequest(err.to_string()),
            PasswordError::Hash(_) => Self::Internal(err.to_string()),
        }
    }
}

// Verification failures are mapped by the middleware; anything reaching this
// conversion happened while signing.
impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        Self::Internal(format!("failed to issue token: {err}"))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {err}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn renders_json_error_body() {
        let response = ApiError::credentials().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, INVALID_CREDENTIALS);
    }

    #[test]
    fn secret_errors_map_to_status() {
        let cases = [
            (SecretError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (SecretError::InvalidName("X".into()), StatusCode::BAD_REQUEST),
            (SecretError::InvalidSize { size: 1 }, StatusCode::BAD_REQUEST),
            (SecretError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                SecretError::Manager(anyhow::anyhow!("vault down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn duplicate_record_is_conflict() {
        let err = DataplaneError::Conflict {
            kind: "user",
            key: "alice".into(),
        };
        let api = ApiError::from(err);
        assert_eq!(api.status(), StatusCode::CONFLICT);
        assert_eq!(api.to_string(), "user alice already exists");
    }

    #[test]
    fn already_initialized_is_unauthorized() {
        let api = ApiError::from(GuardError::AlreadyInitialized);
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            api.to_string(),
            "the service has already been initialized, contact an administrator for credentials"
        );
    }
}
