mod common;

use std::sync::Arc;

use common::{auth_plain, connect, fixture, test_config, with_credentials, with_tls, Client, PASSWORD, USERNAME};
use tokio_rustls::rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

fn connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    let mut reader = std::io::BufReader::new(std::fs::File::open(fixture("tls_ca.pem")).unwrap());
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }

    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn test_starttls_upgrade_clears_state_and_unlocks_auth() {
    let (mut client, outbox) = connect(with_tls(with_credentials(test_config())));
    assert_eq!(client.code().await, 220);

    client.send_raw(b"EHLO x\r\n").await;
    let (_, lines) = client.reply().await;
    assert!(lines.contains(&"STARTTLS".to_string()));
    assert!(!lines.contains(&"AUTH PLAIN".to_string()));

    assert_eq!(client.cmd("MAIL FROM:<a@b>").await, 250);
    assert_eq!(client.cmd("STARTTLS").await, 220);

    let tls = connector()
        .connect(ServerName::try_from("localhost").unwrap(), client.into_inner())
        .await
        .unwrap();
    let mut client = Client::new(tls);

    // Greeting and envelope from the plaintext phase are gone
    assert_eq!(client.cmd("MAIL FROM:<a@b>").await, 502);

    client.send_raw(b"EHLO x\r\n").await;
    let (code, lines) = client.reply().await;
    assert_eq!(code, 250);
    assert!(!lines.contains(&"STARTTLS".to_string()));
    assert!(lines.contains(&"AUTH PLAIN".to_string()));

    assert_eq!(client.cmd("STARTTLS").await, 502);

    let good = format!("AUTH PLAIN {}", auth_plain(USERNAME, PASSWORD));
    assert_eq!(client.cmd(&good).await, 235);

    let code = client
        .transaction("a@b", &["c@d"], &common::message_of_len(200))
        .await;
    assert_eq!(code, 250);
    assert_eq!(outbox.next().await.recipient, "c@d");

    assert_eq!(client.cmd("QUIT").await, 221);
}

#[tokio::test]
async fn test_failed_handshake_ends_session() {
    let (mut client, _outbox) = connect(with_tls(test_config()));
    client.code().await;
    client.cmd("EHLO x").await;
    assert_eq!(client.cmd("STARTTLS").await, 220);

    // Plaintext where a ClientHello belongs
    client.send_raw(b"EHLO still-plaintext\r\n").await;
    assert!(client.closed().await);
}
