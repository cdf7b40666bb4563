use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    Format,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json: {0}")]
    Json(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unsupported token type: {0}")]
    UnsupportedType(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid claim: {0}")]
    InvalidClaims(&'static str),
    #[error("invalid signing key")]
    InvalidKey,
    #[error("token error: {0}")]
    Jwt(String),
}

impl From<JwtError> for TokenError {
    fn from(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::InvalidToken | ErrorKind::Utf8(_) => Self::Format,
            ErrorKind::Base64(_) => Self::Base64,
            ErrorKind::Json(e) => Self::Json(e.to_string()),
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidKeyFormat => Self::InvalidKey,
            _ => Self::Jwt(err.to_string()),
        }
    }
}
