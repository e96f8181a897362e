//! Per-principal policy enforcement with a two-level cache.
//!
//! Rule sets are memoized in-process and shared across processes at
//! `policy:<user_id>` in the KV store. Any write that changes a principal's
//! rules moves the principal's generation (`policy_gen:<user_id>`), drops the
//! shared entry and publishes the id on [`POLICY_INVALIDATE_CHANNEL`]. Shared
//! entries carry the generation they were built under and are ignored once it
//! moves, so a build that raced a write can never be served later. Every
//! process runs [`AccessControl::spawn_invalidator`] to drop its memoized
//! copy on delivery, and drops all of them whenever the subscription is
//! re-established. Deliveries are idempotent and unordered.

mod model;

pub use model::{key_match, EffectMode, ModelError, PolicyModel, DEFAULT_MODEL};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use service_core::kv::{KeyValueStore, SubscriptionEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::policy_provider::PolicyProvider;
use super::ServiceError;
use crate::models::{PolicyRule, Principal};

pub const POLICY_INVALIDATE_CHANNEL: &str = "policy_invalidate";

fn cache_key(user_id: Uuid) -> String {
    format!("policy:{}", user_id)
}

fn generation_key(user_id: Uuid) -> String {
    format!("policy_gen:{}", user_id)
}

#[derive(Serialize, Deserialize)]
struct CachedRules {
    generation: Option<String>,
    rules: Vec<PolicyRule>,
}

pub struct AccessControl {
    model: PolicyModel,
    provider: Arc<dyn PolicyProvider>,
    kv: Arc<dyn KeyValueStore>,
    cache_ttl_seconds: u64,
    evaluators: DashMap<Uuid, Arc<Vec<PolicyRule>>>,
    // Bumped on every invalidation so a build that raced one is not memoized.
    epoch: AtomicU64,
}

impl AccessControl {
    pub fn new(
        model: PolicyModel,
        provider: Arc<dyn PolicyProvider>,
        kv: Arc<dyn KeyValueStore>,
        cache_ttl_seconds: u64,
    ) -> Self {
        Self {
            model,
            provider,
            kv,
            cache_ttl_seconds,
            evaluators: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    /// `Ok(())` when `principal` may perform `action` on `resource`.
    pub async fn enforce(
        &self,
        principal: &Principal,
        resource: &str,
        action: &str,
    ) -> Result<(), ServiceError> {
        if self.is_allowed(principal.user_id, resource, action).await? {
            Ok(())
        } else {
            tracing::info!(
                user_id = %principal.user_id,
                resource = %resource,
                action = %action,
                "Access denied"
            );
            Err(ServiceError::AccessDenied)
        }
    }

    pub async fn is_allowed(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
    ) -> Result<bool, ServiceError> {
        let rules = self.rules_for(user_id).await?;
        let subject = user_id.to_string();
        Ok(self.model.evaluate(&[&subject, resource, action], &rules))
    }

    /// The principal's effective rule set, from cache when possible.
    pub async fn rules_for(&self, user_id: Uuid) -> Result<Arc<Vec<PolicyRule>>, ServiceError> {
        if let Some(rules) = self.evaluators.get(&user_id) {
            return Ok(Arc::clone(&rules));
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let (rules, current) = self.load(user_id).await?;
        let rules = Arc::new(rules);
        if current && self.epoch.load(Ordering::SeqCst) == epoch {
            self.evaluators.insert(user_id, Arc::clone(&rules));
        }
        Ok(rules)
    }

    /// Rules plus whether they may be memoized: `false` when the generation
    /// moved while they were being built.
    async fn load(&self, user_id: Uuid) -> Result<(Vec<PolicyRule>, bool), ServiceError> {
        let generation = match self.kv.get(&generation_key(user_id)).await {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Policy generation read failed, bypassing shared cache");
                return Ok((self.provider.policies_for(user_id).await?, false));
            }
        };

        if let Some(rules) = self.read_shared(user_id, &generation).await {
            return Ok((rules, true));
        }

        let rules = self.provider.policies_for(user_id).await?;
        match self.kv.get(&generation_key(user_id)).await {
            Ok(after) if after == generation => {}
            Ok(_) => {
                tracing::debug!(user_id = %user_id, "Policy changed during build, not caching");
                return Ok((rules, false));
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Policy generation read failed, not caching");
                return Ok((rules, false));
            }
        }

        // Stamped with the generation read before the build, so a write that
        // lands after this check still orphans the entry.
        let cached = CachedRules { generation, rules };
        match serde_json::to_string(&cached) {
            Ok(serialized) => {
                if let Err(e) = self
                    .kv
                    .set(&cache_key(user_id), &serialized, self.cache_ttl_seconds)
                    .await
                {
                    tracing::warn!(user_id = %user_id, error = %e, "Policy cache write failed");
                }
            }
            Err(e) => tracing::warn!(user_id = %user_id, error = %e, "Policy serialization failed"),
        }
        tracing::debug!(user_id = %user_id, rules = cached.rules.len(), "Built policy evaluator");
        Ok((cached.rules, true))
    }

    async fn read_shared(&self, user_id: Uuid, generation: &Option<String>) -> Option<Vec<PolicyRule>> {
        let raw = match self.kv.get(&cache_key(user_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Policy cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<CachedRules>(&raw) {
            Ok(cached) if &cached.generation == generation => Some(cached.rules),
            Ok(_) => {
                tracing::debug!(user_id = %user_id, "Ignoring policy cache from an older generation");
                None
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Discarding corrupt policy cache");
                None
            }
        }
    }

    /// Drop the memoized rules for `user_id` in this process only.
    pub fn forget(&self, user_id: Uuid) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.evaluators.remove(&user_id);
    }

    /// Drop every memoized rule set in this process.
    pub fn forget_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.evaluators.clear();
    }

    /// Move `user_id` to a new generation and drop both cache levels here.
    pub async fn invalidate(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.forget(user_id);
        // Outlives any shared entry written under the old generation
        self.kv
            .set(
                &generation_key(user_id),
                &Uuid::new_v4().to_string(),
                self.cache_ttl_seconds,
            )
            .await
            .map_err(ServiceError::Kv)?;
        self.kv
            .del(&cache_key(user_id))
            .await
            .map_err(ServiceError::Kv)?;
        Ok(())
    }

    /// Invalidate locally and tell every other process to do the same.
    pub async fn publish_invalidate(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.invalidate(user_id).await?;
        self.kv
            .publish(POLICY_INVALIDATE_CHANNEL, &user_id.to_string())
            .await
            .map_err(ServiceError::Kv)?;
        metrics::counter!("policy_invalidations_published_total").increment(1);
        Ok(())
    }

    /// Apply one event from the invalidation channel.
    pub fn apply(&self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Subscribed => {
                // Invalidations published while unsubscribed were missed
                tracing::info!("Policy invalidation channel (re)subscribed, dropping memoized rules");
                self.forget_all();
            }
            SubscriptionEvent::Message(message) => match Uuid::parse_str(message.trim()) {
                Ok(user_id) => self.forget(user_id),
                Err(_) => tracing::warn!(message = %message, "Ignoring malformed invalidation"),
            },
        }
    }

    /// Subscribe to [`POLICY_INVALIDATE_CHANNEL`] and apply every event.
    /// The backend may confirm the subscription later; rules memoized before
    /// that are dropped when it does.
    pub async fn spawn_invalidator(self: &Arc<Self>) -> Result<JoinHandle<()>, ServiceError> {
        let mut rx = self
            .kv
            .subscribe(POLICY_INVALIDATE_CHANNEL)
            .await
            .map_err(ServiceError::Kv)?;
        let engine = Arc::clone(self);

        Ok(tokio::spawn(async move {
            tracing::info!("Policy invalidator started");
            while let Some(event) = rx.recv().await {
                engine.apply(event);
            }
            tracing::info!("Policy invalidator stopped");
        }))
    }
}
