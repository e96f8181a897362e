use axum::{
    extract::{FromRequest, Request},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::dtos::ErrorResponse;

fn reject(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error,
            details: None,
        }),
    )
        .into_response()
}

fn validate<T: Validate>(value: T) -> Result<T, Response> {
    value.validate().map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: "Validation error".to_string(),
                details: Some(e.to_string()),
            }),
        )
            .into_response()
    })?;
    Ok(value)
}

/// True when the caller asked for JSON rather than an HTML redirect.
pub fn wants_json(headers: &HeaderMap) -> bool {
    let accepts = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));
    accepts || is_json_body(headers)
}

fn is_json_body(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("Json parse error: {}", e)))?;
        Ok(ValidatedJson(validate(value)?))
    }
}

/// Accepts either a JSON or an urlencoded body, chosen by `Content-Type`, so
/// the same endpoint serves HTML forms and API clients.
pub struct ValidatedInput<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedInput<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let value = if is_json_body(req.headers()) {
            let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
                reject(StatusCode::BAD_REQUEST, format!("Json parse error: {}", e))
            })?;
            value
        } else {
            let Form(value) = Form::<T>::from_request(req, state).await.map_err(|e| {
                reject(StatusCode::BAD_REQUEST, format!("Form parse error: {}", e))
            })?;
            value
        };
        Ok(ValidatedInput(validate(value)?))
    }
}
