use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Bad Gateway: {0}")]
    BadGateway(String),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<lettre::error::Error> for AppError {
    fn from(err: lettre::error::Error) -> Self {
        AppError::EmailError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl AppError {
    /// HTTP status this error renders to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::RedisError(_)
            | AppError::EmailError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing message. Server-side failures collapse to a generic text.
    pub fn public_message(&self) -> String {
        match self {
            AppError::ValidationError(_) => "Validation error".to_string(),
            AppError::BadRequest(err)
            | AppError::NotFound(err)
            | AppError::Unauthorized(err)
            | AppError::Forbidden(err)
            | AppError::Conflict(err) => err.to_string(),
            AppError::TooManyRequests(msg, _) => msg.clone(),
            AppError::BadGateway(_) => "Bad Gateway".to_string(),
            AppError::ServiceUnavailable => "Service unavailable".to_string(),
            AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::RedisError(_)
            | AppError::EmailError(_)
            | AppError::ConfigError(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let details = match &self {
            AppError::ValidationError(err) => Some(err.to_string()),
            _ => None,
        };
        let retry_after = match &self {
            AppError::TooManyRequests(_, retry) => *retry,
            _ => None,
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: self.public_message(),
                details,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}
