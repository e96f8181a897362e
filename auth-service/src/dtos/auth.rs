use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "password123")]
    pub password: String,
}

/// Submitted from the form behind an invite link.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 64, message = "Name must be 1-64 characters"))]
    #[schema(example = "Jane Doe")]
    pub name: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "password123", min_length = 8)]
    pub password: String,

    #[schema(example = "password123")]
    pub confirm_password: String,

    #[validate(length(min = 1, message = "Invite id is required"))]
    pub invite_id: String,

    #[validate(length(min = 1, message = "Invite token is required"))]
    pub invite_token: String,
}

/// `?id=..&token=..` carried by emailed links.
#[derive(Debug, Deserialize, IntoParams)]
pub struct LinkQuery {
    #[param(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[param(example = "1b4e28ba-2fa1-11d2-883f-0016d3cca427")]
    pub token: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ResetQuery {
    pub id: Option<Uuid>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EmailRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,
}

/// `id` and `token` may come from the body or from the link's query string.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    pub id: Option<Uuid>,

    #[validate(length(min = 1, message = "Token is required"))]
    pub token: Option<String>,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    pub confirm_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub new_password: String,

    pub confirm_password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserInfoResponse {
    pub user_id: Uuid,
    #[schema(example = "Jane Doe")]
    pub name: String,
    #[schema(example = "user@example.com")]
    pub email: String,
    /// Value the client must echo in `X-CSRF-Token` on state-changing requests.
    pub csrf_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InviteResponse {
    pub invite_id: Uuid,
}
