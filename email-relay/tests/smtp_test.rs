mod common;

use base64::{engine::general_purpose::STANDARD, Engine};
use common::{auth_plain, connect, message_of_len, test_config, with_credentials, PASSWORD, USERNAME};
use email_relay::dkim::{self, canonicalize::relaxed_body, DkimSigner};
use sha2::{Digest, Sha256};

#[tokio::test]
async fn test_happy_path_forwards_signed_message() {
    let (mut client, outbox) = connect(test_config());

    let body = message_of_len(100);
    assert_eq!(client.code().await, 220);
    assert_eq!(client.cmd("HELO x").await, 250);
    assert_eq!(client.cmd("MAIL FROM:<a@b>").await, 250);
    assert_eq!(client.cmd("RCPT TO:<c@d>").await, 250);
    assert_eq!(client.cmd("DATA").await, 354);
    client.send_raw(&body).await;
    client.send_raw(b".\r\n").await;
    assert_eq!(client.code().await, 250);

    let delivery = outbox.next().await;
    assert_eq!(delivery.host, "mx.d");
    assert_eq!(delivery.port, 25);
    assert_eq!(delivery.sender, "a@b");
    assert_eq!(delivery.recipient, "c@d");
    assert!(delivery.message.starts_with(b"DKIM-Signature:"));
    assert!(delivery.message.ends_with(&body));

    let header = String::from_utf8_lossy(&delivery.message[..delivery.message.len() - body.len()]);
    let body_hash = STANDARD.encode(Sha256::digest(relaxed_body(&body)));
    assert!(header.contains(&format!("bh={};", body_hash)));

    let signer = DkimSigner::from_pem_file(
        "b",
        "relay",
        vec![],
        &common::fixture("dkim_private.pem"),
    )
    .unwrap();
    dkim::verify(&delivery.message, signer.public_key()).unwrap();

    assert_eq!(client.cmd("QUIT").await, 221);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_greeting_names_host() {
    let (mut client, _outbox) = connect(test_config());
    let (code, lines) = client.reply().await;
    assert_eq!(code, 220);
    assert_eq!(lines, vec!["email_service ESMTP ready"]);
}

#[tokio::test]
async fn test_one_copy_per_recipient() {
    let (mut client, outbox) = connect(test_config());
    client.code().await;
    client.cmd("EHLO x").await;

    let code = client
        .transaction("a@b", &["c@d", "e@f"], &message_of_len(80))
        .await;
    assert_eq!(code, 250);

    let mut recipients = vec![outbox.next().await.recipient, outbox.next().await.recipient];
    recipients.sort();
    assert_eq!(recipients, vec!["c@d", "e@f"]);
}

#[tokio::test]
async fn test_size_boundary() {
    let (mut client, outbox) = connect(test_config());
    client.code().await;
    client.cmd("HELO x").await;

    assert_eq!(client.transaction("a@b", &["c@d"], &message_of_len(1024)).await, 250);
    assert_eq!(outbox.next().await.recipient, "c@d");

    assert_eq!(client.transaction("a@b", &["c@d"], &message_of_len(1025)).await, 552);

    // Envelope was reset, the session goes on
    assert_eq!(client.cmd("RCPT TO:<c@d>").await, 502);
    assert_eq!(client.cmd("NOOP").await, 250);
    assert!(outbox.is_empty().await);
}

#[tokio::test]
async fn test_dot_stuffed_lines_are_restored() {
    let (mut client, outbox) = connect(test_config());
    client.code().await;
    client.cmd("HELO x").await;

    let code = client
        .transaction("a@b", &["c@d"], b"Subject: dots\r\n\r\n..hidden\r\n...\r\n")
        .await;
    assert_eq!(code, 250);

    let delivery = outbox.next().await;
    assert!(delivery.message.ends_with(b"\r\n\r\n.hidden\r\n..\r\n"));
}

#[tokio::test]
async fn test_command_sequencing() {
    let (mut client, _outbox) = connect(test_config());
    client.code().await;

    assert_eq!(client.cmd("MAIL FROM:<a@b>").await, 502);
    assert_eq!(client.cmd("HELO x").await, 250);
    assert_eq!(client.cmd("RCPT TO:<c@d>").await, 502);
    assert_eq!(client.cmd("MAIL FROM:<a@b>").await, 250);
    assert_eq!(client.cmd("MAIL FROM:<a@b>").await, 502);
    assert_eq!(client.cmd("DATA").await, 502);
    assert_eq!(client.cmd("RCPT TO:malformed").await, 502);
    assert_eq!(client.cmd("VRFY c@d").await, 502);
}

#[tokio::test]
async fn test_recipient_limit() {
    let (mut client, _outbox) = connect(test_config());
    client.code().await;
    client.cmd("HELO x").await;
    client.cmd("MAIL FROM:<a@b>").await;

    for rcpt in ["r1@d", "r2@d", "r3@d"] {
        assert_eq!(client.cmd(&format!("RCPT TO:<{}>", rcpt)).await, 250);
    }
    assert_eq!(client.cmd("RCPT TO:<r4@d>").await, 452);
}

#[tokio::test]
async fn test_rset_keeps_greeting() {
    let (mut client, _outbox) = connect(test_config());
    client.code().await;
    client.cmd("HELO x").await;
    client.cmd("MAIL FROM:<a@b>").await;

    assert_eq!(client.cmd("RSET").await, 250);
    assert_eq!(client.cmd("MAIL FROM:<a@b>").await, 250);
}

#[tokio::test]
async fn test_repeated_helo_resets_transaction() {
    let (mut client, _outbox) = connect(test_config());
    client.code().await;
    client.cmd("HELO x").await;
    client.cmd("MAIL FROM:<a@b>").await;

    assert_eq!(client.cmd("EHLO y").await, 250);
    assert_eq!(client.cmd("RCPT TO:<c@d>").await, 502);
}

#[tokio::test]
async fn test_overlong_line() {
    let (mut client, _outbox) = connect(test_config());
    client.code().await;

    let long = format!("HELO {}", "x".repeat(600));
    assert_eq!(client.cmd(&long).await, 500);
    assert_eq!(client.cmd("NOOP").await, 250);
}

#[tokio::test]
async fn test_ehlo_capabilities() {
    let (mut client, _outbox) = connect(test_config());
    client.code().await;

    client.send_raw(b"EHLO x\r\n").await;
    let (code, lines) = client.reply().await;
    assert_eq!(code, 250);
    assert_eq!(lines[0], "email_service");
    assert!(lines.contains(&"SIZE 1024".to_string()));
    assert!(!lines.contains(&"STARTTLS".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with("AUTH")));
}

#[tokio::test]
async fn test_starttls_without_certificate() {
    let (mut client, _outbox) = connect(test_config());
    client.code().await;
    client.cmd("EHLO x").await;
    assert_eq!(client.cmd("STARTTLS").await, 454);
}

#[tokio::test]
async fn test_auth_plain_over_plaintext_when_allowed() {
    let mut config = with_credentials(test_config());
    config.auth.allow_insecure_auth = true;
    let (mut client, _outbox) = connect(config);
    client.code().await;

    client.send_raw(b"EHLO x\r\n").await;
    let (_, lines) = client.reply().await;
    assert!(lines.contains(&"AUTH PLAIN".to_string()));

    let bad = format!("AUTH PLAIN {}", auth_plain(USERNAME, "wrong"));
    assert_eq!(client.cmd(&bad).await, 535);

    assert_eq!(client.cmd("AUTH PLAIN").await, 334);
    assert_eq!(client.cmd(&auth_plain(USERNAME, PASSWORD)).await, 235);

    let again = format!("AUTH PLAIN {}", auth_plain(USERNAME, PASSWORD));
    assert_eq!(client.cmd(&again).await, 502);
}

#[tokio::test]
async fn test_auth_refused_without_tls() {
    let (mut client, _outbox) = connect(with_credentials(test_config()));
    client.code().await;
    client.cmd("EHLO x").await;

    let good = format!("AUTH PLAIN {}", auth_plain(USERNAME, PASSWORD));
    assert_eq!(client.cmd(&good).await, 502);
}

#[tokio::test]
async fn test_submission_requires_auth() {
    let mut config = with_credentials(test_config());
    config.auth.require_auth = true;
    config.auth.allow_insecure_auth = true;
    let (mut client, outbox) = connect(config);
    client.code().await;
    client.cmd("EHLO x").await;

    assert_eq!(client.cmd("MAIL FROM:<a@b>").await, 530);

    let good = format!("AUTH PLAIN {}", auth_plain(USERNAME, PASSWORD));
    assert_eq!(client.cmd(&good).await, 235);
    assert_eq!(client.transaction("a@b", &["c@d"], &message_of_len(64)).await, 250);
    assert_eq!(outbox.next().await.recipient, "c@d");
}

#[tokio::test]
async fn test_idle_timeout_closes() {
    let mut config = test_config();
    config.smtp.idle_timeout_seconds = 1;
    let (mut client, _outbox) = connect(config);
    client.code().await;

    assert_eq!(client.code().await, 421);
    assert!(client.closed().await);
}

#[tokio::test]
async fn test_unsigned_without_dkim() {
    let mut config = test_config();
    config.dkim = None;
    let (mut client, outbox) = connect(config);
    client.code().await;
    client.cmd("HELO x").await;

    let body = message_of_len(64);
    assert_eq!(client.transaction("a@b", &["c@d"], &body).await, 250);
    assert_eq!(outbox.next().await.message, body);
}
