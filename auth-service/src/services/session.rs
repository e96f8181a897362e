//! Server-side sessions.
//!
//! The record lives at `session:<id>` in the KV store. The browser holds
//! `id.mac` where `mac = base64url(HMAC-SHA256(signing_key, id))`; cookies
//! that fail the MAC check are rejected before any KV access.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use service_core::kv::KeyValueStore;
use service_core::utils::signature::{sign_value, verify_signed_value};
use std::sync::Arc;
use uuid::Uuid;

use super::ServiceError;
use crate::models::{Principal, User};

pub const SESSION_COOKIE: &str = "session_id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub csrf_token: String,
}

impl SessionData {
    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.user_id,
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    signing_key: Arc<Vec<u8>>,
    ttl_seconds: u64,
}

fn key(id: &str) -> String {
    format!("session:{}", id)
}

/// Non-secret handle for a session, carried as `sid` in access tokens.
pub fn fingerprint(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(id.as_bytes()))
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, signing_key: &[u8], ttl_seconds: u64) -> Self {
        Self {
            kv,
            signing_key: Arc::new(signing_key.to_vec()),
            ttl_seconds,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Start a session for `user`, returning the new id and record.
    pub async fn create(&self, user: &User) -> Result<(String, SessionData), ServiceError> {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let id = URL_SAFE_NO_PAD.encode(bytes);

        let data = SessionData {
            user_id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            csrf_token: Uuid::new_v4().to_string(),
        };
        self.write(&id, &data).await?;

        tracing::info!(user_id = %user.id, "Session created");
        Ok((id, data))
    }

    pub async fn find(&self, id: &str) -> Result<SessionData, ServiceError> {
        let raw = self
            .kv
            .get(&key(id))
            .await
            .map_err(ServiceError::Kv)?
            .ok_or(ServiceError::SessionNotFound)?;
        serde_json::from_str(&raw).map_err(|e| ServiceError::Internal(e.into()))
    }

    pub async fn update_csrf(&self, id: &str, token: &str) -> Result<SessionData, ServiceError> {
        let mut data = self.find(id).await?;
        data.csrf_token = token.to_string();
        self.write(id, &data).await?;
        Ok(data)
    }

    /// Replace the CSRF token with a fresh one and return it.
    pub async fn rotate_csrf(&self, id: &str) -> Result<String, ServiceError> {
        let token = Uuid::new_v4().to_string();
        self.update_csrf(id, &token).await?;
        Ok(token)
    }

    pub async fn destroy(&self, id: &str) -> Result<(), ServiceError> {
        self.kv.del(&key(id)).await.map_err(ServiceError::Kv)?;
        Ok(())
    }

    /// Cookie value binding the browser to session `id`.
    pub fn cookie_value(&self, id: &str) -> Result<String, ServiceError> {
        sign_value(&self.signing_key, id).map_err(ServiceError::Internal)
    }

    /// Extract the session id from a cookie value, or `None` if the MAC fails.
    pub fn parse_cookie(&self, value: &str) -> Option<String> {
        verify_signed_value(&self.signing_key, value)
    }

    async fn write(&self, id: &str, data: &SessionData) -> Result<(), ServiceError> {
        let value = serde_json::to_string(data).map_err(|e| ServiceError::Internal(e.into()))?;
        self.kv
            .set(&key(id), &value, self.ttl_seconds)
            .await
            .map_err(ServiceError::Kv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::kv::MemoryStore;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()), b"0123456789abcdef0123456789abcdef", 60)
    }

    fn user() -> User {
        User::new("Alice".into(), "alice@example.com".into(), "hash".into())
    }

    #[tokio::test]
    async fn test_create_find_destroy() {
        let sessions = store();
        let user = user();
        let (id, data) = sessions.create(&user).await.unwrap();

        // 32 bytes, base64url without padding
        assert_eq!(id.len(), 43);
        assert_eq!(sessions.find(&id).await.unwrap(), data);
        assert_eq!(data.principal().user_id, user.id);

        sessions.destroy(&id).await.unwrap();
        assert!(matches!(
            sessions.find(&id).await,
            Err(ServiceError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_rotate_csrf() {
        let sessions = store();
        let (id, data) = sessions.create(&user()).await.unwrap();
        let rotated = sessions.rotate_csrf(&id).await.unwrap();
        assert_ne!(rotated, data.csrf_token);
        assert_eq!(sessions.find(&id).await.unwrap().csrf_token, rotated);
    }

    #[test]
    fn test_fingerprint_hides_id() {
        let fp = fingerprint("session-id");
        assert_eq!(fp, fingerprint("session-id"));
        assert_ne!(fp, fingerprint("session-id2"));
        assert!(!fp.contains("session-id"));
    }

    #[tokio::test]
    async fn test_cookie_binding() {
        let sessions = store();
        let (id, _) = sessions.create(&user()).await.unwrap();
        let cookie = sessions.cookie_value(&id).unwrap();

        assert_eq!(sessions.parse_cookie(&cookie).as_deref(), Some(id.as_str()));
        assert!(sessions.parse_cookie(&id).is_none());

        let other = SessionStore::new(Arc::new(MemoryStore::new()), b"another-key-another-key-another!", 60);
        assert!(other.parse_cookie(&cookie).is_none());
    }
}
