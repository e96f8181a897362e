use super::{namespaced, KeyValueStore, SubscriptionEvent, SubscriptionSink, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::StreamExt;
use redis::{aio::ConnectionManager, Client};
use std::time::Duration;
use tokio::sync::mpsc;

/// Redis-backed [`KeyValueStore`].
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, anyhow::Error> {
        tracing::info!(namespace = %namespace, "Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects transparently
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            client,
            manager,
            namespace: namespace.to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(namespaced(&self.namespace, key))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get key: {}", e))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(namespaced(&self.namespace, key))
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set key: {}", e))
    }

    async fn del(&self, key: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(namespaced(&self.namespace, key))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete key: {}", e))?;
        Ok(removed > 0)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to publish: {}", e))?;
        tracing::debug!(channel = %channel, receivers, "Published message");
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::Receiver<SubscriptionEvent>, anyhow::Error> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let mut sink = SubscriptionSink::new(tx, channel);
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut backoff = ExponentialBackoff {
                max_elapsed_time: None,
                max_interval: Duration::from_secs(30),
                ..ExponentialBackoff::default()
            };

            loop {
                match client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(e) = pubsub.subscribe(&channel).await {
                            tracing::error!(channel = %channel, error = %e, "Redis subscribe failed");
                        } else {
                            tracing::info!(channel = %channel, "Subscribed to Redis channel");
                            backoff.reset();
                            // Publishes during the outage are gone
                            if !sink.resync() {
                                return;
                            }
                            let mut stream = pubsub.on_message();
                            while let Some(msg) = stream.next().await {
                                let payload: String = match msg.get_payload() {
                                    Ok(payload) => payload,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "Ignoring non-UTF-8 pub/sub payload");
                                        continue;
                                    }
                                };
                                if !sink.message(payload) {
                                    tracing::debug!(channel = %channel, "Subscriber dropped, stopping");
                                    return;
                                }
                            }
                            tracing::warn!(channel = %channel, "Redis pub/sub stream ended");
                        }
                    }
                    Err(e) => {
                        tracing::error!(channel = %channel, error = %e, "Redis pub/sub connection failed");
                    }
                }

                if sink.is_closed() {
                    return;
                }
                let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                tokio::time::sleep(delay).await;
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}
