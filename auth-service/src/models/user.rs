use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Name reserved for the bootstrap account.
pub const ROOT_USER_NAME: &str = "ROOT";

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Argon2id encoding, never the plaintext.
    pub password: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, email: String, password: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            email: normalize_email(&email),
            password,
            verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// Emails are stored trimmed and lowercased so uniqueness is case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            verified: user.verified,
            created_at: user.created_at,
        }
    }
}
