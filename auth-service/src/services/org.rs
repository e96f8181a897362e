//! Organizations: membership, organization-scoped policies and email invites.
//!
//! Every member inherits the organization's permissions, so any change to
//! membership or policies invalidates the affected members' cached rules.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::access_control::AccessControl;
use super::auth::token_error;
use super::database::AuthStore;
use super::email::EmailProvider;
use super::templates::{TemplateData, ORG_INVITE_TEMPLATE};
use super::token_vault::{Purpose, TokenVault};
use super::ServiceError;
use crate::dtos::policy::PolicyRequest;
use crate::models::user::normalize_email;
use crate::models::{Effect, Organization, Permission, Principal, User};

pub const ORGANIZATIONS_RESOURCE: &str = "/org";

#[derive(Debug, Serialize, Deserialize)]
struct OrgInviteClaims {
    org_id: Uuid,
    email: String,
}

fn member_resource(org_id: Uuid) -> String {
    format!("/org/{}/member", org_id)
}

fn policy_resource(org_id: Uuid) -> String {
    format!("/org/{}/policy", org_id)
}

/// Whether an organization-attached rule can only ever match the
/// organization's own resources: the literal part before any wildcard must be
/// `org_resource` itself or lie beneath it.
fn scoped_to(resource: &str, org_resource: &str) -> bool {
    if !resource
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | ':' | '*'))
    {
        return false;
    }
    let literal = resource.split('*').next().unwrap_or_default();
    literal.starts_with(org_resource)
        && matches!(literal.as_bytes().get(org_resource.len()), None | Some(b'/'))
}

#[derive(Clone)]
pub struct OrganizationService {
    store: Arc<dyn AuthStore>,
    vault: TokenVault,
    email: Arc<dyn EmailProvider>,
    access: Arc<AccessControl>,
    base_url: String,
}

impl OrganizationService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        vault: TokenVault,
        email: Arc<dyn EmailProvider>,
        access: Arc<AccessControl>,
        base_url: String,
    ) -> Self {
        Self {
            store,
            vault,
            email,
            access,
            base_url,
        }
    }

    /// Create an organization. The creator becomes a member and is granted
    /// every action on the organization and its sub-resources.
    pub async fn create(
        &self,
        principal: &Principal,
        name: &str,
        description: &str,
    ) -> Result<Organization, ServiceError> {
        self.access
            .enforce(principal, ORGANIZATIONS_RESOURCE, "create")
            .await?;

        let org = Organization::new(name.trim().to_string(), description.to_string());
        self.store.insert_organization(&org).await?;
        self.store
            .insert_user_permission(&Permission::new(
                principal.user_id,
                &format!("{}*", org.resource()),
                "*",
                Effect::Allow,
            ))
            .await?;
        self.store
            .add_organization_member(org.id, principal.user_id)
            .await?;
        self.access.publish_invalidate(principal.user_id).await?;

        tracing::info!(org_id = %org.id, created_by = %principal.user_id, "Organization created");
        Ok(org)
    }

    pub async fn list(&self, principal: &Principal) -> Result<Vec<Organization>, ServiceError> {
        let mut visible = Vec::new();
        for org in self.store.list_organizations().await? {
            if self
                .access
                .is_allowed(principal.user_id, &org.resource(), "read")
                .await?
            {
                visible.push(org);
            }
        }
        Ok(visible)
    }

    pub async fn get(&self, principal: &Principal, id: Uuid) -> Result<Organization, ServiceError> {
        let org = self.find(id).await?;
        self.access.enforce(principal, &org.resource(), "read").await?;
        Ok(org)
    }

    pub async fn delete(&self, principal: &Principal, id: Uuid) -> Result<(), ServiceError> {
        let org = self.find(id).await?;
        self.access
            .enforce(principal, &org.resource(), "delete")
            .await?;

        let members = self.store.list_organization_members(org.id).await?;
        if !self.store.delete_organization(org.id).await? {
            return Err(ServiceError::OrganizationNotFound);
        }
        self.invalidate_users(members.iter().map(|m| m.id)).await?;

        tracing::info!(org_id = %org.id, "Organization deleted");
        Ok(())
    }

    pub async fn list_members(
        &self,
        principal: &Principal,
        id: Uuid,
    ) -> Result<Vec<User>, ServiceError> {
        let org = self.find(id).await?;
        self.access
            .enforce(principal, &member_resource(org.id), "read")
            .await?;
        self.store.list_organization_members(org.id).await
    }

    pub async fn add_member(
        &self,
        principal: &Principal,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let org = self.find(id).await?;
        self.access
            .enforce(principal, &member_resource(org.id), "create")
            .await?;
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(ServiceError::AccountNotFound);
        }

        self.store.add_organization_member(org.id, user_id).await?;
        self.access.publish_invalidate(user_id).await?;
        tracing::info!(org_id = %org.id, user_id = %user_id, "Member added");
        Ok(())
    }

    pub async fn remove_member(
        &self,
        principal: &Principal,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let org = self.find(id).await?;
        self.access
            .enforce(principal, &member_resource(org.id), "delete")
            .await?;

        if !self
            .store
            .remove_organization_member(org.id, user_id)
            .await?
        {
            return Err(ServiceError::NotFound);
        }
        self.access.publish_invalidate(user_id).await?;
        tracing::info!(org_id = %org.id, user_id = %user_id, "Member removed");
        Ok(())
    }

    pub async fn list_policies(
        &self,
        principal: &Principal,
        id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        let org = self.find(id).await?;
        self.access
            .enforce(principal, &policy_resource(org.id), "read")
            .await?;
        self.store.list_organization_permissions(org.id).await
    }

    pub async fn add_policy(
        &self,
        principal: &Principal,
        id: Uuid,
        req: &PolicyRequest,
    ) -> Result<Permission, ServiceError> {
        let org = self.find(id).await?;
        self.access
            .enforce(principal, &policy_resource(org.id), "create")
            .await?;
        // Members inherit these rules, so they may not reach outside the org
        if !scoped_to(&req.resource, &org.resource()) {
            tracing::warn!(
                org_id = %org.id,
                user_id = %principal.user_id,
                resource = %req.resource,
                "Refused organization policy outside the organization"
            );
            return Err(ServiceError::Validation(format!(
                "Organization policies must target {} or its sub-resources",
                org.resource()
            )));
        }

        let permission = Permission::new(org.id, &req.resource, &req.action, req.effect);
        self.store.insert_organization_permission(&permission).await?;
        self.invalidate_members(org.id).await?;

        tracing::info!(org_id = %org.id, permission_id = %permission.id, "Organization policy added");
        Ok(permission)
    }

    pub async fn delete_policy(
        &self,
        principal: &Principal,
        id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), ServiceError> {
        let org = self.find(id).await?;
        self.access
            .enforce(principal, &policy_resource(org.id), "delete")
            .await?;

        if !self
            .store
            .delete_organization_permission(org.id, permission_id)
            .await?
        {
            return Err(ServiceError::NotFound);
        }
        self.invalidate_members(org.id).await?;
        tracing::info!(org_id = %org.id, permission_id = %permission_id, "Organization policy deleted");
        Ok(())
    }

    /// Email an invitation to join the organization.
    pub async fn invite(
        &self,
        principal: &Principal,
        id: Uuid,
        email: &str,
    ) -> Result<Uuid, ServiceError> {
        let org = self.find(id).await?;
        self.access
            .enforce(principal, &member_resource(org.id), "invite")
            .await?;

        let email = normalize_email(email);
        let invite_id = Uuid::new_v4();
        let token = self
            .vault
            .create_with_claims(
                Purpose::OrgInvite,
                &invite_id.to_string(),
                &OrgInviteClaims {
                    org_id: org.id,
                    email: email.clone(),
                },
            )
            .await?;

        let data = TemplateData {
            base_url: self.base_url.clone(),
            token,
            id: invite_id.to_string(),
        };
        self.email
            .send_template(&email, ORG_INVITE_TEMPLATE, &data)
            .await?;

        tracing::info!(org_id = %org.id, invite_id = %invite_id, "Organization invite sent");
        Ok(invite_id)
    }

    /// Redeem an invite addressed to the caller's email.
    pub async fn accept_invite(
        &self,
        principal: &Principal,
        invite_id: &str,
        token: &str,
    ) -> Result<Organization, ServiceError> {
        let claims: OrgInviteClaims = self
            .vault
            .verify_with_claims(Purpose::OrgInvite, invite_id, token)
            .await
            .map_err(|e| token_error(e, ServiceError::InvalidInviteToken))?;
        if normalize_email(&principal.email) != claims.email {
            tracing::warn!(user_id = %principal.user_id, "Organization invite redeemed by another account");
            return Err(ServiceError::InvalidInviteToken);
        }

        let org = self.find(claims.org_id).await?;
        self.store
            .add_organization_member(org.id, principal.user_id)
            .await?;
        self.access.publish_invalidate(principal.user_id).await?;

        tracing::info!(org_id = %org.id, user_id = %principal.user_id, "Organization invite accepted");
        Ok(org)
    }

    async fn find(&self, id: Uuid) -> Result<Organization, ServiceError> {
        self.store
            .find_organization(id)
            .await?
            .ok_or(ServiceError::OrganizationNotFound)
    }

    async fn invalidate_members(&self, org_id: Uuid) -> Result<(), ServiceError> {
        let members = self.store.list_organization_members(org_id).await?;
        self.invalidate_users(members.iter().map(|m| m.id)).await
    }

    async fn invalidate_users(
        &self,
        users: impl Iterator<Item = Uuid>,
    ) -> Result<(), ServiceError> {
        for user_id in users {
            self.access.publish_invalidate(user_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_scope() {
        let org = "/org/5f0c1b9e-8d3a-4f7e-9a57-0c3f2b1d4e6a";
        assert!(scoped_to(org, org));
        assert!(scoped_to(&format!("{}*", org), org));
        assert!(scoped_to(&format!("{}/member", org), org));
        assert!(scoped_to(&format!("{}/policy/*", org), org));

        assert!(!scoped_to("/*", org));
        assert!(!scoped_to("*", org));
        assert!(!scoped_to("/org/*", org));
        assert!(!scoped_to("/user", org));
        assert!(!scoped_to(&format!("{}0", org), org));
        assert!(!scoped_to(&format!("{}/../../user", org), org));
        assert!(!scoped_to(&format!("{}|.*", org), org));
    }
}
