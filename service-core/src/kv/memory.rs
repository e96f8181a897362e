use super::{namespaced, KeyValueStore, SubscriptionEvent, SubscriptionSink, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

#[derive(Default)]
struct Inner {
    entries: HashMap<String, (String, Instant)>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

/// In-process [`KeyValueStore`]. Clones share the same data and channels.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    namespace: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A view of the same backing store under another namespace.
    pub fn with_namespace(&self, namespace: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            namespace: namespace.to_string(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, anyhow::Error> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory store mutex poisoned: {}", e))
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>, anyhow::Error> {
        let mut inner = self.lock()?;
        Ok(inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_BUFFER).0)
            .clone())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let key = namespaced(&self.namespace, key);
        let mut inner = self.lock()?;
        match inner.entries.get(&key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                inner.entries.remove(&key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let expires = Instant::now() + Duration::from_secs(ttl_seconds.max(1));
        self.lock()?.entries.insert(
            namespaced(&self.namespace, key),
            (value.to_string(), expires),
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, anyhow::Error> {
        let removed = self
            .lock()?
            .entries
            .remove(&namespaced(&self.namespace, key));
        Ok(matches!(removed, Some((_, expires)) if expires > Instant::now()))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), anyhow::Error> {
        // No receivers is not an error, matching Redis PUBLISH semantics
        let _ = self.sender(channel)?.send(message.to_string());
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::Receiver<SubscriptionEvent>, anyhow::Error> {
        let mut source = self.sender(channel)?.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut sink = SubscriptionSink::new(tx, channel);
        let channel = channel.to_string();

        // Subscribed synchronously above
        sink.resync();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if !sink.message(message) {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %channel, skipped, "Subscriber lagged");
                        if !sink.resync() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = MemoryStore::new().with_namespace("test");
        store.set("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        assert!(store.del("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let root = MemoryStore::new();
        let a = root.with_namespace("a");
        let b = root.with_namespace("b");
        a.set("k", "from-a", 60).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), None);
        assert_eq!(root.get("a:k").await.unwrap().as_deref(), Some("from-a"));
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let store = MemoryStore::new();
        let other_process = store.clone();

        let mut rx1 = store.subscribe("policy_invalidate").await.unwrap();
        let mut rx2 = other_process.subscribe("policy_invalidate").await.unwrap();

        store.publish("policy_invalidate", "user-1").await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.recv().await, Some(SubscriptionEvent::Subscribed));
            assert_eq!(
                rx.recv().await,
                Some(SubscriptionEvent::Message("user-1".to_string()))
            );
        }
    }
}
