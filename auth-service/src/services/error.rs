use service_core::error::AppError;
use thiserror::Error;

use crate::utils::PasswordError;

/// Domain failures. The `Display` text of the non-internal kinds is the
/// user-facing notification.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Account not found")]
    AccountNotFound,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Please verify your email before logging in")]
    UnverifiedUser,

    #[error("Email already in use")]
    EmailAlreadyInUse,

    #[error("Account already verified")]
    AccountAlreadyVerified,

    #[error("Invalid or expired invite")]
    InvalidInviteToken,

    #[error("Invalid or expired registration link")]
    InvalidRegistrationToken,

    #[error("Invalid or expired password reset link")]
    InvalidPasswordToken,

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Access denied")]
    AccessDenied,

    #[error("Application not found")]
    AppNotFound,

    #[error("Organization not found")]
    OrganizationNotFound,

    #[error("Token not found")]
    TokenNotFound,

    #[error("Token mismatch")]
    TokenMismatch,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Entity already exists")]
    DuplicateEntity,

    #[error("Not found")]
    NotFound,

    #[error("invalid_grant")]
    InvalidGrant,

    #[error("invalid_client")]
    InvalidClient,

    #[error("unsupported_grant_type")]
    UnsupportedGrantType,

    #[error("Redirect URI does not match the application")]
    InvalidRedirectUri,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Password hashing error: {0}")]
    Password(#[from] PasswordError),

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Key-value store error: {0}")]
    Kv(anyhow::Error),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// `true` for failures caused by infrastructure rather than the caller.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ServiceError::Password(_)
                | ServiceError::Database(_)
                | ServiceError::Kv(_)
                | ServiceError::Email(_)
                | ServiceError::Internal(_)
        )
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = anyhow::anyhow!(err.to_string());
        match err {
            ServiceError::AccountNotFound
            | ServiceError::InvalidPassword
            | ServiceError::SessionNotFound
            | ServiceError::InvalidClient => AppError::Unauthorized(message),
            ServiceError::UnverifiedUser | ServiceError::AccessDenied => {
                AppError::Forbidden(message)
            }
            ServiceError::EmailAlreadyInUse
            | ServiceError::AccountAlreadyVerified
            | ServiceError::DuplicateEntity => AppError::Conflict(message),
            ServiceError::AppNotFound
            | ServiceError::OrganizationNotFound
            | ServiceError::NotFound => AppError::NotFound(message),
            ServiceError::InvalidInviteToken
            | ServiceError::InvalidRegistrationToken
            | ServiceError::InvalidPasswordToken
            | ServiceError::PasswordMismatch
            | ServiceError::TokenNotFound
            | ServiceError::TokenMismatch
            | ServiceError::InvalidGrant
            | ServiceError::UnsupportedGrantType
            | ServiceError::InvalidRedirectUri
            | ServiceError::Validation(_) => AppError::BadRequest(message),
            ServiceError::Password(e) => AppError::InternalError(anyhow::Error::new(e)),
            ServiceError::Database(e) => AppError::DatabaseError(e),
            ServiceError::Kv(e) => AppError::InternalError(e),
            ServiceError::Email(e) => AppError::EmailError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::InvalidPassword, StatusCode::UNAUTHORIZED),
            (ServiceError::AccessDenied, StatusCode::FORBIDDEN),
            (ServiceError::EmailAlreadyInUse, StatusCode::CONFLICT),
            (ServiceError::AppNotFound, StatusCode::NOT_FOUND),
            (ServiceError::InvalidGrant, StatusCode::BAD_REQUEST),
            (
                ServiceError::Database(anyhow::anyhow!("down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let err = ServiceError::Kv(anyhow::anyhow!("redis://secret-host refused"));
        assert!(err.is_internal());
        assert_eq!(AppError::from(err).public_message(), "Internal server error");
    }
}
