//! OAuth 2.0 authorization-code flow and client application management.
//!
//! Authorization codes are single-use vault tokens of purpose `authcode`; the
//! code handed to the client is `<id>.<plaintext>`. Access tokens are
//! RSA-signed claims sets, refresh tokens are opaque database rows.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use service_core::utils::signer::{AccessTokenClaims, Signer};
use std::sync::Arc;
use uuid::Uuid;

use super::access_control::AccessControl;
use super::auth::token_error;
use super::database::AuthStore;
use super::token_vault::{Purpose, TokenVault};
use super::ServiceError;
use crate::dtos::oauth::{
    CreateApplicationRequest, TokenRequest, TokenResponse, UpdateApplicationRequest,
};
use crate::models::{Application, Effect, Permission, Principal, RefreshToken};
use crate::utils::PasswordHasher;

pub const APPLICATIONS_RESOURCE: &str = "/oauth/application";

#[derive(Debug, Serialize, Deserialize)]
struct AuthCodeClaims {
    user_id: Uuid,
    client_id: String,
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn validate_redirect_uri(uri: &str) -> Result<(), ServiceError> {
    match reqwest::Url::parse(uri) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.fragment().is_none() => Ok(()),
        _ => Err(ServiceError::InvalidRedirectUri),
    }
}

#[derive(Clone)]
pub struct OAuthService {
    store: Arc<dyn AuthStore>,
    vault: TokenVault,
    hasher: PasswordHasher,
    signer: Arc<Signer>,
    access: Arc<AccessControl>,
    access_token_ttl: i64,
    rotate_refresh_tokens: bool,
}

impl OAuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        vault: TokenVault,
        hasher: PasswordHasher,
        signer: Arc<Signer>,
        access: Arc<AccessControl>,
        access_token_ttl: i64,
        rotate_refresh_tokens: bool,
    ) -> Self {
        Self {
            store,
            vault,
            hasher,
            signer,
            access,
            access_token_ttl,
            rotate_refresh_tokens,
        }
    }

    /// Issue an authorization code for `principal` and return the client
    /// redirect carrying it.
    pub async fn authorize(
        &self,
        principal: &Principal,
        client_id: &str,
        redirect_uri: Option<&str>,
        state: Option<&str>,
    ) -> Result<String, ServiceError> {
        let app = self
            .store
            .find_application_by_client_id(client_id)
            .await?
            .ok_or(ServiceError::AppNotFound)?;
        if let Some(uri) = redirect_uri {
            if uri != app.redirect_uri {
                return Err(ServiceError::InvalidRedirectUri);
            }
        }

        self.access
            .enforce(principal, &app.resource(), "authorize")
            .await?;

        let code_id = Uuid::new_v4().to_string();
        let plaintext = self
            .vault
            .create_with_claims(
                Purpose::AuthCode,
                &code_id,
                &AuthCodeClaims {
                    user_id: principal.user_id,
                    client_id: app.client_id.clone(),
                },
            )
            .await?;

        let separator = if app.redirect_uri.contains('?') { '&' } else { '?' };
        let mut location = format!(
            "{}{}code={}",
            app.redirect_uri,
            separator,
            urlencoding::encode(&format!("{}.{}", code_id, plaintext))
        );
        if let Some(state) = state {
            location.push_str("&state=");
            location.push_str(&urlencoding::encode(state));
        }

        tracing::info!(user_id = %principal.user_id, client_id = %app.client_id, "Authorization code issued");
        Ok(location)
    }

    pub async fn exchange(&self, req: &TokenRequest) -> Result<TokenResponse, ServiceError> {
        let app = self.authenticate_client(&req.client_id, &req.client_secret).await?;

        let (user_id, refresh_token) = match req.grant_type.as_str() {
            "authorization_code" => self.redeem_code(&app, req).await?,
            "refresh_token" => self.refresh(&app, req).await?,
            other => {
                tracing::debug!(grant_type = %other, "Unsupported grant type");
                return Err(ServiceError::UnsupportedGrantType);
            }
        };

        let mut claims = AccessTokenClaims::new(user_id.to_string(), self.access_token_ttl);
        claims.client_id = Some(app.client_id.clone());
        let access_token = self
            .signer
            .issue(&claims)
            .map_err(|e| ServiceError::Internal(e.into()))?;

        metrics::counter!("oauth_tokens_issued_total", "grant_type" => req.grant_type.clone())
            .increment(1);
        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl,
            refresh_token,
        })
    }

    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Application, ServiceError> {
        let app = self
            .store
            .find_application_by_client_id(client_id)
            .await?
            .ok_or(ServiceError::InvalidClient)?;
        if !self.hasher.verify(&app.client_secret, client_secret)? {
            tracing::warn!(client_id = %client_id, "Client authentication failed");
            return Err(ServiceError::InvalidClient);
        }
        Ok(app)
    }

    async fn redeem_code(
        &self,
        app: &Application,
        req: &TokenRequest,
    ) -> Result<(Uuid, String), ServiceError> {
        let code = req.code.as_deref().ok_or(ServiceError::InvalidGrant)?;
        let (code_id, plaintext) = code.split_once('.').ok_or(ServiceError::InvalidGrant)?;
        if let Some(uri) = req.redirect_uri.as_deref() {
            if uri != app.redirect_uri {
                return Err(ServiceError::InvalidGrant);
            }
        }

        let claims: AuthCodeClaims = self
            .vault
            .verify_with_claims(Purpose::AuthCode, code_id, plaintext)
            .await
            .map_err(|e| token_error(e, ServiceError::InvalidGrant))?;
        if claims.client_id != app.client_id {
            tracing::warn!(client_id = %app.client_id, "Authorization code presented by another client");
            return Err(ServiceError::InvalidGrant);
        }
        if self.store.find_user_by_id(claims.user_id).await?.is_none() {
            return Err(ServiceError::InvalidGrant);
        }

        let refresh = RefreshToken::new(claims.user_id, app.id);
        self.store.insert_refresh_token(&refresh).await?;
        Ok((claims.user_id, refresh.token))
    }

    async fn refresh(
        &self,
        app: &Application,
        req: &TokenRequest,
    ) -> Result<(Uuid, String), ServiceError> {
        let presented = req.refresh_token.as_deref().ok_or(ServiceError::InvalidGrant)?;
        let existing = self
            .store
            .find_refresh_token(presented)
            .await?
            .ok_or(ServiceError::InvalidGrant)?;
        if existing.app_id != app.id {
            return Err(ServiceError::InvalidGrant);
        }

        if !self.rotate_refresh_tokens {
            return Ok((existing.user_id, existing.token));
        }

        // Losing the delete race means another exchange already rotated it.
        if !self.store.delete_refresh_token(&existing.token).await? {
            return Err(ServiceError::InvalidGrant);
        }
        let rotated = RefreshToken::new(existing.user_id, app.id);
        self.store.insert_refresh_token(&rotated).await?;
        Ok((existing.user_id, rotated.token))
    }

    /// Register a client. The caller is granted every action on it.
    pub async fn create_app(
        &self,
        principal: &Principal,
        req: &CreateApplicationRequest,
    ) -> Result<(Application, String), ServiceError> {
        self.access
            .enforce(principal, APPLICATIONS_RESOURCE, "create")
            .await?;
        validate_redirect_uri(&req.redirect_uri)?;

        let secret = generate_secret();
        let app = Application::new(
            req.name.trim().to_string(),
            req.description.clone(),
            req.redirect_uri.clone(),
            self.hasher.encode(&secret)?,
        );
        self.store.insert_application(&app).await?;

        self.store
            .insert_user_permission(&Permission::new(
                principal.user_id,
                &app.resource(),
                "*",
                Effect::Allow,
            ))
            .await?;
        self.access.publish_invalidate(principal.user_id).await?;

        tracing::info!(app_id = %app.id, client_id = %app.client_id, "Application created");
        Ok((app, secret))
    }

    /// Applications the caller may read.
    pub async fn list_apps(&self, principal: &Principal) -> Result<Vec<Application>, ServiceError> {
        let mut visible = Vec::new();
        for app in self.store.list_applications().await? {
            if self
                .access
                .is_allowed(principal.user_id, &app.resource(), "read")
                .await?
            {
                visible.push(app);
            }
        }
        Ok(visible)
    }

    pub async fn get_app(&self, principal: &Principal, id: Uuid) -> Result<Application, ServiceError> {
        self.authorized_app(principal, id, "read").await
    }

    pub async fn update_app(
        &self,
        principal: &Principal,
        id: Uuid,
        req: &UpdateApplicationRequest,
    ) -> Result<Application, ServiceError> {
        let mut app = self.authorized_app(principal, id, "update").await?;

        if let Some(name) = &req.name {
            app.name = name.trim().to_string();
        }
        if let Some(description) = &req.description {
            app.description = description.clone();
        }
        if let Some(uri) = &req.redirect_uri {
            validate_redirect_uri(uri)?;
            app.redirect_uri = uri.clone();
        }

        self.store.update_application(&app).await?;
        tracing::info!(app_id = %app.id, "Application updated");
        Ok(app)
    }

    /// Replace the client secret, returning the new plaintext.
    pub async fn rotate_secret(
        &self,
        principal: &Principal,
        id: Uuid,
    ) -> Result<(Application, String), ServiceError> {
        let mut app = self.authorized_app(principal, id, "update").await?;
        let secret = generate_secret();
        app.client_secret = self.hasher.encode(&secret)?;
        self.store.update_application(&app).await?;

        tracing::info!(app_id = %app.id, "Client secret rotated");
        Ok((app, secret))
    }

    pub async fn delete_app(&self, principal: &Principal, id: Uuid) -> Result<(), ServiceError> {
        let app = self.authorized_app(principal, id, "delete").await?;
        let affected = self
            .store
            .delete_application(app.id, &app.resource())
            .await?
            .ok_or(ServiceError::AppNotFound)?;
        for user_id in &affected {
            self.access.publish_invalidate(*user_id).await?;
        }
        tracing::info!(app_id = %app.id, revoked = affected.len(), "Application deleted");
        Ok(())
    }

    async fn authorized_app(
        &self,
        principal: &Principal,
        id: Uuid,
        action: &str,
    ) -> Result<Application, ServiceError> {
        let app = self
            .store
            .find_application(id)
            .await?
            .ok_or(ServiceError::AppNotFound)?;
        self.access.enforce(principal, &app.resource(), action).await?;
        Ok(app)
    }
}
