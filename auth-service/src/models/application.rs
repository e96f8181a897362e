//! OAuth client applications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Application {
    pub id: Uuid,
    pub client_id: String,
    /// Argon2id encoding of the client secret.
    pub client_secret: String,
    pub redirect_uri: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Application {
    pub fn new(
        name: String,
        description: String,
        redirect_uri: String,
        encoded_secret: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4().simple().to_string(),
            client_secret: encoded_secret,
            redirect_uri,
            name,
            description,
            created_at: Utc::now(),
        }
    }

    pub fn resource(&self) -> String {
        format!("/oauth/application/{}", self.id)
    }
}

/// Application as returned to clients; the secret hash never leaves the service.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApplicationResponse {
    pub id: Uuid,
    pub client_id: String,
    pub redirect_uri: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<Application> for ApplicationResponse {
    fn from(app: Application) -> Self {
        Self {
            id: app.id,
            client_id: app.client_id,
            redirect_uri: app.redirect_uri,
            name: app.name,
            description: app.description,
            created_at: app.created_at,
        }
    }
}
