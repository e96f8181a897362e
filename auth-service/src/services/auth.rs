//! Credential, verification and invite flows.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::access_control::AccessControl;
use super::database::AuthStore;
use super::email::EmailProvider;
use super::templates::{
    TemplateData, FORGOT_TEMPLATE, INVITE_TEMPLATE, VERIFY_TEMPLATE,
};
use super::token_vault::{Purpose, TokenVault};
use super::ServiceError;
use crate::models::user::{normalize_email, ROOT_USER_NAME};
use crate::models::{Effect, Permission, Principal, Role, User};
use crate::utils::PasswordHasher;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteClaims {
    pub invited_by: Uuid,
    pub email: String,
}

/// Token redemption failures surface as the flow-specific error.
pub(crate) fn token_error(err: ServiceError, kind: ServiceError) -> ServiceError {
    match err {
        ServiceError::TokenNotFound | ServiceError::TokenMismatch => kind,
        other => other,
    }
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    vault: TokenVault,
    hasher: PasswordHasher,
    email: Arc<dyn EmailProvider>,
    access: Arc<AccessControl>,
    base_url: String,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        vault: TokenVault,
        hasher: PasswordHasher,
        email: Arc<dyn EmailProvider>,
        access: Arc<AccessControl>,
        base_url: String,
    ) -> Self {
        Self {
            store,
            vault,
            hasher,
            email,
            access,
            base_url,
        }
    }

    pub async fn login_user(&self, email: &str, password: &str) -> Result<User, ServiceError> {
        let user = self
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
            .ok_or(ServiceError::AccountNotFound)?;

        if !self.hasher.verify(&user.password, password)? {
            tracing::warn!(user_id = %user.id, "Login failed: invalid password");
            return Err(ServiceError::InvalidPassword);
        }
        if !user.verified {
            return Err(ServiceError::UnverifiedUser);
        }

        tracing::info!(user_id = %user.id, "User logged in");
        Ok(user)
    }

    /// Register through an invite. The user starts unverified and receives a
    /// verification email.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
        invite_id: &str,
        invite_token: &str,
    ) -> Result<User, ServiceError> {
        if password != confirm_password {
            return Err(ServiceError::PasswordMismatch);
        }
        let email = normalize_email(email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyInUse);
        }

        let invite: InviteClaims = self
            .vault
            .verify_with_claims(Purpose::Invite, invite_id, invite_token)
            .await
            .map_err(|e| token_error(e, ServiceError::InvalidInviteToken))?;
        if normalize_email(&invite.email) != email {
            tracing::warn!(invite_id = %invite_id, "Invite redeemed for a different email");
            return Err(ServiceError::InvalidInviteToken);
        }

        let user = User::new(name.trim().to_string(), email, self.hasher.encode(password)?);
        self.store.insert_user(&user).await.map_err(|e| match e {
            ServiceError::DuplicateEntity => ServiceError::EmailAlreadyInUse,
            other => other,
        })?;
        tracing::info!(user_id = %user.id, invited_by = %invite.invited_by, "User registered");

        self.send_verification(&user).await?;
        Ok(user)
    }

    pub async fn verify_user(&self, id: Uuid, token: &str) -> Result<(), ServiceError> {
        self.vault
            .verify(Purpose::Register, &id.to_string(), token)
            .await
            .map_err(|e| token_error(e, ServiceError::InvalidRegistrationToken))?;
        self.store.set_user_verified(id).await?;
        tracing::info!(user_id = %id, "User verified");
        Ok(())
    }

    pub async fn resend_verify_email(&self, email: &str) -> Result<(), ServiceError> {
        let user = self
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
            .ok_or(ServiceError::AccountNotFound)?;
        if user.verified {
            return Err(ServiceError::AccountAlreadyVerified);
        }
        self.send_verification(&user).await
    }

    /// Email an invite link; requires `invite` on `/user`.
    pub async fn invite_user(&self, from: &Principal, email: &str) -> Result<Uuid, ServiceError> {
        self.access.enforce(from, "/user", "invite").await?;

        let email = normalize_email(email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyInUse);
        }

        let invite_id = Uuid::new_v4();
        let token = self
            .vault
            .create_with_claims(
                Purpose::Invite,
                &invite_id.to_string(),
                &InviteClaims {
                    invited_by: from.user_id,
                    email: email.clone(),
                },
            )
            .await?;

        self.send(&email, INVITE_TEMPLATE, invite_id.to_string(), token)
            .await?;
        tracing::info!(invited_by = %from.user_id, invite_id = %invite_id, "Invite sent");
        Ok(invite_id)
    }

    /// Unknown addresses succeed silently so the endpoint cannot be used to
    /// enumerate accounts.
    pub async fn create_forgot_password_token(&self, email: &str) -> Result<(), ServiceError> {
        let Some(user) = self
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
        else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = self
            .vault
            .create(Purpose::Forgot, &user.id.to_string())
            .await?;
        self.send(&user.email, FORGOT_TEMPLATE, user.id.to_string(), token)
            .await
    }

    pub async fn change_password_with_token(
        &self,
        id: Uuid,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), ServiceError> {
        if new_password != confirm_password {
            return Err(ServiceError::PasswordMismatch);
        }
        self.vault
            .verify(Purpose::Forgot, &id.to_string(), token)
            .await
            .map_err(|e| token_error(e, ServiceError::InvalidPasswordToken))?;

        let user = self
            .store
            .find_user_by_id(id)
            .await?
            .ok_or(ServiceError::AccountNotFound)?;
        self.store
            .update_user_password(user.id, &self.hasher.encode(new_password)?)
            .await?;
        tracing::info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    pub async fn change_password(
        &self,
        principal: &Principal,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), ServiceError> {
        if new_password != confirm_password {
            return Err(ServiceError::PasswordMismatch);
        }
        let user = self
            .store
            .find_user_by_id(principal.user_id)
            .await?
            .ok_or(ServiceError::AccountNotFound)?;
        if !self.hasher.verify(&user.password, current_password)? {
            return Err(ServiceError::InvalidPassword);
        }

        self.store
            .update_user_password(user.id, &self.hasher.encode(new_password)?)
            .await?;
        self.vault
            .destroy(Purpose::Forgot, &user.id.to_string())
            .await?;
        tracing::info!(user_id = %user.id, "Password changed");
        Ok(())
    }

    /// Seed the bootstrap account with full access. Returns the existing
    /// account when one is already present.
    pub async fn create_root_user(&self, email: &str, password: &str) -> Result<User, ServiceError> {
        if let Some(existing) = self.store.find_user_by_name(ROOT_USER_NAME).await? {
            tracing::debug!(user_id = %existing.id, "Root user already exists");
            return Ok(existing);
        }

        let mut user = User::new(
            ROOT_USER_NAME.to_string(),
            email.to_string(),
            self.hasher.encode(password)?,
        );
        user.verified = true;
        self.store.insert_user(&user).await?;

        let role = match self.store.find_role_by_name(ADMIN_ROLE).await? {
            Some(role) => role,
            None => {
                let role = Role::new(ADMIN_ROLE);
                self.store.insert_role(&role).await?;
                self.store
                    .insert_role_permission(&Permission::new(role.id, "/*", "*", Effect::Allow))
                    .await?;
                role
            }
        };
        self.store.add_role_user(role.id, user.id).await?;
        self.access.publish_invalidate(user.id).await?;

        tracing::info!(user_id = %user.id, "Root user created");
        Ok(user)
    }

    async fn send_verification(&self, user: &User) -> Result<(), ServiceError> {
        let token = self
            .vault
            .create(Purpose::Register, &user.id.to_string())
            .await?;
        self.send(&user.email, VERIFY_TEMPLATE, user.id.to_string(), token)
            .await
    }

    async fn send(
        &self,
        to: &str,
        template: &str,
        id: String,
        token: String,
    ) -> Result<(), ServiceError> {
        let data = TemplateData {
            base_url: self.base_url.clone(),
            token,
            id,
        };
        self.email.send_template(to, template, &data).await
    }
}
