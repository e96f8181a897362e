use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::ApplicationResponse;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuthorizeQuery {
    #[param(example = "9f8b6a4c2d1e4f0a8b7c6d5e4f3a2b1c")]
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    /// Only `code` is supported.
    pub response_type: Option<String>,
}

/// Form body of `POST /oauth/token`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[schema(example = "authorization_code")]
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub code: Option<String>,
    pub refresh_token: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 900)]
    pub expires_in: i64,
    pub refresh_token: String,
}

/// RFC 6749 section 5.2 error body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OAuthErrorResponse {
    #[schema(example = "invalid_grant")]
    pub error: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateApplicationRequest {
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    #[schema(example = "Dashboard")]
    pub name: String,

    #[serde(default)]
    #[validate(length(max = 1024))]
    pub description: String,

    #[validate(url(message = "Redirect URI must be an absolute URL"))]
    #[schema(example = "https://dashboard.example.com/callback")]
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateApplicationRequest {
    #[validate(length(min = 1, max = 128, message = "Name must be 1-128 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 1024))]
    pub description: Option<String>,

    #[validate(url(message = "Redirect URI must be an absolute URL"))]
    pub redirect_uri: Option<String>,
}

/// The plaintext secret is only ever returned here.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApplicationSecretResponse {
    pub application: ApplicationResponse,
    pub client_secret: String,
}
