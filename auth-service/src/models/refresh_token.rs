use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Opaque refresh token bound to a user and an application.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: Uuid,
    pub app_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(user_id: Uuid, app_id: Uuid) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            user_id,
            app_id,
            created_at: Utc::now(),
        }
    }
}
