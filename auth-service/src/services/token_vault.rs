//! Single-use verification tokens.
//!
//! Each token is stored Argon2id-hashed at `<purpose>:<id>` with a
//! purpose-specific TTL, optionally alongside a JSON claims payload. A
//! successful verification deletes the row, and only the caller whose delete
//! actually removed it wins, so a token redeems at most once.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use service_core::kv::KeyValueStore;
use std::sync::Arc;
use uuid::Uuid;

use super::ServiceError;
use crate::utils::PasswordHasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Register,
    Forgot,
    Invite,
    AuthCode,
    OrgInvite,
}

impl Purpose {
    pub fn prefix(&self) -> &'static str {
        match self {
            Purpose::Register => "register",
            Purpose::Forgot => "forgot",
            Purpose::Invite => "invite",
            Purpose::AuthCode => "authcode",
            Purpose::OrgInvite => "org_invite",
        }
    }
}

/// Lifetimes in seconds per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub register: u64,
    pub forgot: u64,
    pub invite: u64,
    pub authcode: u64,
    pub org_invite: u64,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            register: 24 * 3600,
            forgot: 3600,
            invite: 72 * 3600,
            authcode: 300,
            org_invite: 72 * 3600,
        }
    }
}

impl TokenTtls {
    pub fn for_purpose(&self, purpose: Purpose) -> u64 {
        match purpose {
            Purpose::Register => self.register,
            Purpose::Forgot => self.forgot,
            Purpose::Invite => self.invite,
            Purpose::AuthCode => self.authcode,
            Purpose::OrgInvite => self.org_invite,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    encoded: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claims: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct TokenVault {
    kv: Arc<dyn KeyValueStore>,
    hasher: PasswordHasher,
    ttls: TokenTtls,
}

fn key(purpose: Purpose, id: &str) -> String {
    format!("{}:{}", purpose.prefix(), id)
}

impl TokenVault {
    pub fn new(kv: Arc<dyn KeyValueStore>, hasher: PasswordHasher, ttls: TokenTtls) -> Self {
        Self { kv, hasher, ttls }
    }

    /// Mint a token for `(purpose, id)` and return its plaintext. Replaces any
    /// outstanding token for the same key.
    pub async fn create(&self, purpose: Purpose, id: &str) -> Result<String, ServiceError> {
        self.store(purpose, id, None).await
    }

    pub async fn create_with_claims<T: Serialize>(
        &self,
        purpose: Purpose,
        id: &str,
        claims: &T,
    ) -> Result<String, ServiceError> {
        let claims = serde_json::to_value(claims).map_err(|e| ServiceError::Internal(e.into()))?;
        self.store(purpose, id, Some(claims)).await
    }

    async fn store(
        &self,
        purpose: Purpose,
        id: &str,
        claims: Option<serde_json::Value>,
    ) -> Result<String, ServiceError> {
        let plaintext = Uuid::new_v4().to_string();
        let row = StoredToken {
            encoded: self.hasher.encode(&plaintext)?,
            claims,
        };
        let value = serde_json::to_string(&row).map_err(|e| ServiceError::Internal(e.into()))?;

        self.kv
            .set(&key(purpose, id), &value, self.ttls.for_purpose(purpose))
            .await
            .map_err(ServiceError::Kv)?;

        tracing::debug!(purpose = purpose.prefix(), id = %id, "Verification token created");
        Ok(plaintext)
    }

    pub async fn verify(&self, purpose: Purpose, id: &str, plaintext: &str) -> Result<(), ServiceError> {
        self.redeem(purpose, id, plaintext).await.map(|_| ())
    }

    /// Redeem the token and decode the claims stored with it.
    pub async fn verify_with_claims<T: DeserializeOwned>(
        &self,
        purpose: Purpose,
        id: &str,
        plaintext: &str,
    ) -> Result<T, ServiceError> {
        let claims = self
            .redeem(purpose, id, plaintext)
            .await?
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Token carries no claims")))?;
        serde_json::from_value(claims).map_err(|e| ServiceError::Internal(e.into()))
    }

    pub async fn destroy(&self, purpose: Purpose, id: &str) -> Result<(), ServiceError> {
        self.kv
            .del(&key(purpose, id))
            .await
            .map_err(ServiceError::Kv)?;
        Ok(())
    }

    async fn redeem(
        &self,
        purpose: Purpose,
        id: &str,
        plaintext: &str,
    ) -> Result<Option<serde_json::Value>, ServiceError> {
        let key = key(purpose, id);
        let raw = self
            .kv
            .get(&key)
            .await
            .map_err(ServiceError::Kv)?
            .ok_or(ServiceError::TokenNotFound)?;
        let row: StoredToken =
            serde_json::from_str(&raw).map_err(|e| ServiceError::Internal(e.into()))?;

        if !self.hasher.verify(&row.encoded, plaintext)? {
            tracing::warn!(purpose = purpose.prefix(), id = %id, "Verification token mismatch");
            return Err(ServiceError::TokenMismatch);
        }

        // Concurrent redeemers race on the delete; the loser sees no row.
        if !self.kv.del(&key).await.map_err(ServiceError::Kv)? {
            return Err(ServiceError::TokenNotFound);
        }

        Ok(row.claims)
    }
}
