use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::database::AuthStore;
use super::ServiceError;
use crate::models::PolicyRule;

/// Source of a principal's effective policy set.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn policies_for(&self, user_id: Uuid) -> Result<Vec<PolicyRule>, ServiceError>;
}

/// User permissions, plus those of every role the user holds and every
/// organization the user belongs to. All rules are emitted with the user as
/// subject.
#[derive(Clone)]
pub struct StorePolicyProvider {
    store: Arc<dyn AuthStore>,
}

impl StorePolicyProvider {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PolicyProvider for StorePolicyProvider {
    async fn policies_for(&self, user_id: Uuid) -> Result<Vec<PolicyRule>, ServiceError> {
        let (direct, roles, orgs) = futures::try_join!(
            self.store.list_user_permissions(user_id),
            self.store.list_role_permissions_for_user(user_id),
            self.store.list_organization_permissions_for_user(user_id),
        )?;

        let rules: Vec<PolicyRule> = direct
            .iter()
            .chain(roles.iter())
            .chain(orgs.iter())
            .map(|p| p.to_rule(user_id))
            .collect();

        tracing::debug!(
            user_id = %user_id,
            direct = direct.len(),
            role = roles.len(),
            organization = orgs.len(),
            "Assembled policy set"
        );
        Ok(rules)
    }
}
