//! User listing and per-user policy administration.

use std::sync::Arc;
use uuid::Uuid;

use super::access_control::AccessControl;
use super::database::AuthStore;
use super::ServiceError;
use crate::dtos::policy::PolicyRequest;
use crate::models::{Permission, PolicyRule, Principal, User};

pub const USERS_RESOURCE: &str = "/user";

fn policy_resource(user_id: Uuid) -> String {
    format!("/user/{}/policy", user_id)
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn AuthStore>,
    access: Arc<AccessControl>,
}

impl UserService {
    pub fn new(store: Arc<dyn AuthStore>, access: Arc<AccessControl>) -> Self {
        Self { store, access }
    }

    pub async fn list_users(&self, principal: &Principal) -> Result<Vec<User>, ServiceError> {
        self.access.enforce(principal, USERS_RESOURCE, "read").await?;
        self.store.list_users().await
    }

    pub async fn list_policies(
        &self,
        principal: &Principal,
        user_id: Uuid,
    ) -> Result<Vec<Permission>, ServiceError> {
        self.access
            .enforce(principal, &policy_resource(user_id), "read")
            .await?;
        self.store.list_user_permissions(user_id).await
    }

    pub async fn add_policy(
        &self,
        principal: &Principal,
        user_id: Uuid,
        req: &PolicyRequest,
    ) -> Result<Permission, ServiceError> {
        self.access
            .enforce(principal, &policy_resource(user_id), "create")
            .await?;
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(ServiceError::AccountNotFound);
        }

        let permission = Permission::new(user_id, &req.resource, &req.action, req.effect);
        self.store.insert_user_permission(&permission).await?;
        self.access.publish_invalidate(user_id).await?;

        tracing::info!(
            user_id = %user_id,
            granted_by = %principal.user_id,
            resource = %permission.resource,
            action = %permission.action,
            effect = %permission.effect,
            "User policy added"
        );
        Ok(permission)
    }

    pub async fn delete_policy(
        &self,
        principal: &Principal,
        user_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.access
            .enforce(principal, &policy_resource(user_id), "delete")
            .await?;
        if !self
            .store
            .delete_user_permission(user_id, permission_id)
            .await?
        {
            return Err(ServiceError::NotFound);
        }
        self.access.publish_invalidate(user_id).await?;
        tracing::info!(user_id = %user_id, permission_id = %permission_id, "User policy deleted");
        Ok(())
    }

    /// Flattened rules currently in force for the caller.
    pub async fn effective_policies(
        &self,
        principal: &Principal,
    ) -> Result<Vec<PolicyRule>, ServiceError> {
        let rules = self.access.rules_for(principal.user_id).await?;
        Ok(rules.as_ref().clone())
    }
}
