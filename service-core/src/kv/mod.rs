//! Namespaced key-value store with TTLs and pub/sub.
//!
//! Durable ephemeral state (sessions, verification tokens, policy caches)
//! lives behind [`KeyValueStore`]. [`RedisStore`] is the production backend;
//! [`MemoryStore`] is an in-process double whose clones share state, so tests
//! can stand up several "processes" against one store.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Capacity of the channel a subscription delivers into. Messages that do
/// not fit are dropped and turned into a [`SubscriptionEvent::Subscribed`].
pub const SUBSCRIPTION_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// The subscription is (re)established. Anything published before this
    /// event, including while the backend was unreachable, may have been
    /// missed, so consumers must resynchronize.
    Subscribed,
    Message(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;

    /// Delete `key`. Returns `true` when this call removed an existing row.
    async fn del(&self, key: &str) -> Result<bool, anyhow::Error>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), anyhow::Error>;

    /// Subscribe to `channel`. Events arrive on the returned receiver until
    /// it is dropped. The backend may confirm the subscription after this
    /// returns; every confirmation, the first included, is reported as
    /// [`SubscriptionEvent::Subscribed`].
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::Receiver<SubscriptionEvent>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Prefix `key` with `namespace` (`<ns>:<key>`); an empty namespace is a no-op.
pub(crate) fn namespaced(namespace: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", namespace, key)
    }
}

/// Producer side of a subscription. A message that does not fit is dropped
/// and a resync is owed; it is sent ahead of the next message.
pub(crate) struct SubscriptionSink {
    tx: mpsc::Sender<SubscriptionEvent>,
    channel: String,
    resync_owed: bool,
}

impl SubscriptionSink {
    pub(crate) fn new(tx: mpsc::Sender<SubscriptionEvent>, channel: &str) -> Self {
        Self {
            tx,
            channel: channel.to_string(),
            resync_owed: false,
        }
    }

    /// Report a (re)subscription. `false` once the consumer is gone.
    pub(crate) fn resync(&mut self) -> bool {
        self.resync_owed = true;
        self.flush_resync()
    }

    /// Forward one message. `false` once the consumer is gone.
    pub(crate) fn message(&mut self, message: String) -> bool {
        if !self.flush_resync() {
            return false;
        }
        if self.resync_owed {
            tracing::warn!(channel = %self.channel, message = %message, "Subscriber channel full, dropping message");
            return true;
        }
        match self.tx.try_send(SubscriptionEvent::Message(message)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(
                    channel = %self.channel,
                    message = ?dropped,
                    "Subscriber channel full, dropping message"
                );
                self.resync_owed = true;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn flush_resync(&mut self) -> bool {
        if !self.resync_owed {
            return true;
        }
        match self.tx.try_send(SubscriptionEvent::Subscribed) {
            Ok(()) => {
                self.resync_owed = false;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_keys() {
        assert_eq!(namespaced("auth", "session:abc"), "auth:session:abc");
        assert_eq!(namespaced("", "session:abc"), "session:abc");
    }

    fn message(text: &str) -> SubscriptionEvent {
        SubscriptionEvent::Message(text.to_string())
    }

    #[tokio::test]
    async fn test_dropped_message_owes_resync() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut sink = SubscriptionSink::new(tx, "c");
        assert!(sink.message("one".to_string()));
        assert!(sink.message("two".to_string()));
        assert!(sink.message("three".to_string()));
        assert_eq!(rx.recv().await, Some(message("one")));
        assert_eq!(rx.recv().await, Some(message("two")));
        assert!(rx.try_recv().is_err());

        // "three" was lost, so the consumer hears about it before "four"
        assert!(sink.message("four".to_string()));
        assert_eq!(rx.recv().await, Some(SubscriptionEvent::Subscribed));
        assert_eq!(rx.recv().await, Some(message("four")));

        drop(rx);
        assert!(!sink.message("five".to_string()));
    }

    #[tokio::test]
    async fn test_resync_is_delivered() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = SubscriptionSink::new(tx, "c");
        assert!(sink.resync());
        assert!(sink.message("one".to_string()));
        assert_eq!(rx.recv().await, Some(SubscriptionEvent::Subscribed));
        assert_eq!(rx.recv().await, Some(message("one")));
    }
}
