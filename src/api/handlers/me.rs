use crate::api::Principal;
use axum::{Json, extract::Extension};

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Return the principal of the presented token.", body = Principal),
        (status = 401, description = "Missing or invalid token.", body = crate::api::error::ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}
