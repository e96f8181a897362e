use axum::{extract::State, http::header, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::AppState;

/// Public half of the access-token signing key
#[utoipa::path(
    get,
    path = "/key/signer",
    responses(
        (status = 200, description = "`{\"public_key\": base64(PKCS#1 DER)}`")
    ),
    tag = "Well-Known"
)]
pub async fn signer_key(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let key = state
        .signer
        .published_key()
        .map_err(|e| AppError::InternalError(e.into()))?;
    Ok((
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(key),
    ))
}
