mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{capturing_relay, message_of_len, serve_one, test_config, CapturingRelay};
use email_relay::forwarder::{ForwardError, Relay};

/// Takes `delay` before handing each message on.
struct SlowRelay {
    inner: CapturingRelay,
    delay: Duration,
}

#[async_trait]
impl Relay for SlowRelay {
    async fn send(
        &self,
        host: &str,
        port: u16,
        sender: &str,
        recipient: &str,
        message: &[u8],
    ) -> Result<(), ForwardError> {
        tokio::time::sleep(self.delay).await;
        self.inner.send(host, port, sender, recipient, message).await
    }
}

#[tokio::test]
async fn test_drain_waits_for_accepted_messages() {
    let (inner, outbox) = capturing_relay();
    let relay = SlowRelay {
        inner,
        delay: Duration::from_millis(300),
    };
    let (server, mut client) = serve_one(test_config(), Arc::new(relay));

    assert_eq!(client.code().await, 220);
    assert_eq!(client.cmd("HELO client").await, 250);
    assert_eq!(
        client.transaction("a@b", &["c@d"], &message_of_len(200)).await,
        250
    );
    assert_eq!(client.cmd("QUIT").await, 221);
    assert!(outbox.is_empty().await);

    assert!(server.drain(Duration::from_secs(5)).await);
    let delivery = outbox.next().await;
    assert_eq!(delivery.recipient, "c@d");
}

#[tokio::test]
async fn test_drain_gives_up_after_grace() {
    let (inner, _outbox) = capturing_relay();
    let relay = SlowRelay {
        inner,
        delay: Duration::from_secs(30),
    };
    let (server, mut client) = serve_one(test_config(), Arc::new(relay));

    assert_eq!(client.code().await, 220);
    assert_eq!(client.cmd("HELO client").await, 250);
    assert_eq!(
        client.transaction("a@b", &["c@d"], &message_of_len(200)).await,
        250
    );

    assert!(!server.drain(Duration::from_millis(50)).await);
}
