//! RBAC rows and the flattened rule form the access-control engine consumes.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl std::str::FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            _ => Err(format!("Invalid effect: {}", s)),
        }
    }
}

/// A `(resource, action, effect)` grant owned by a user, role or organization.
/// `owner_id` is the id of whichever of those the row belongs to.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub resource: String,
    pub action: String,
    pub effect: String,
}

impl Permission {
    pub fn new(owner_id: Uuid, resource: &str, action: &str, effect: Effect) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            resource: resource.to_string(),
            action: action.to_string(),
            effect: effect.as_str().to_string(),
        }
    }

    /// Unknown effects are treated as deny.
    pub fn effect(&self) -> Effect {
        self.effect.parse().unwrap_or(Effect::Deny)
    }

    pub fn to_rule(&self, subject: Uuid) -> PolicyRule {
        PolicyRule {
            sub: subject.to_string(),
            obj: self.resource.clone(),
            act: self.action.clone(),
            eft: self.effect(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
}

impl Role {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }
}

/// One `p` line of the policy model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PolicyRule {
    pub sub: String,
    pub obj: String,
    pub act: String,
    pub eft: Effect,
}

impl PolicyRule {
    /// Field values in `p = sub, obj, act, eft` order.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "sub" => Some(&self.sub),
            "obj" => Some(&self.obj),
            "act" => Some(&self.act),
            "eft" => Some(self.eft.as_str()),
            _ => None,
        }
    }
}
