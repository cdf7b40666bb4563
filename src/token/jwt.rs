//! `jsonwebtoken` glue: HS256 signing, and verification pinned to the HMAC
//! family before any key is tried.

use super::TokenError;
use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Algorithm used for every token this service signs.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// The header as sent, before `jsonwebtoken` narrows `alg` to its own enum.
#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

/// Sign `claims` with `key`.
///
/// # Errors
/// Returns an error if the claims cannot be serialized.
pub fn encode<T: Serialize>(key: &[u8], claims: &T) -> Result<String, TokenError> {
    Ok(jsonwebtoken::encode(
        &Header::new(SIGNING_ALGORITHM),
        claims,
        &EncodingKey::from_secret(key),
    )?)
}

/// Inspect the compact form and header and return the pinned algorithm.
///
/// # Errors
/// Returns an error for a malformed token, a `typ` other than `JWT`, or an
/// algorithm outside `HS256`, `HS384` and `HS512`.
pub fn algorithm(token: &str) -> Result<Algorithm, TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(claims), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Format);
    };
    if header.is_empty() || claims.is_empty() {
        return Err(TokenError::Format);
    }

    let bytes = Base64UrlUnpadded::decode_vec(header).map_err(|_| TokenError::Base64)?;
    let header: RawHeader =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Json(e.to_string()))?;

    if let Some(typ) = header.typ
        && !typ.eq_ignore_ascii_case("JWT")
    {
        return Err(TokenError::UnsupportedType(typ));
    }

    match header.alg.as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(TokenError::UnsupportedAlg(other.to_string())),
    }
}

/// Decode the claim set if `key` produced the signature. `Ok(None)` means it
/// did not and the caller may try another key.
///
/// Expiry is left to the caller so it can use its own clock.
///
/// # Errors
/// Returns an error if the token is malformed or the payload is not a JSON
/// object.
pub fn decode_with(
    token: &str,
    alg: Algorithm,
    key: &[u8],
) -> Result<Option<Map<String, Value>>, TokenError> {
    let mut validation = Validation::new(alg);
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.leeway = 0;

    match jsonwebtoken::decode::<Map<String, Value>>(
        token,
        &DecodingKey::from_secret(key),
        &validation,
    ) {
        Ok(data) => Ok(Some(data.claims)),
        Err(err) if matches!(err.kind(), ErrorKind::InvalidSignature) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
