#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use email_relay::build_server;
use email_relay::config::{
    AuthConfig, Credentials, DkimConfig, Environment, ForwardConfig, RelayConfig, SmtpConfig,
    TlsConfig,
};
use email_relay::forwarder::{ForwardError, MxResolver, Relay};
use email_relay::smtp::SmtpServer;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

pub const USERNAME: &str = "relay-user";
pub const PASSWORD: &str = "relay-pass";

pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

pub fn test_config() -> RelayConfig {
    RelayConfig {
        environment: Environment::Dev,
        service_name: "email-relay-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        metrics_port: None,
        smtp: SmtpConfig {
            hostname: "email_service".to_string(),
            listen_port: 2525,
            max_message_bytes: 1024,
            max_recipients: 3,
            max_line_length: 512,
            idle_timeout_seconds: 30,
            data_timeout_seconds: 30,
            shutdown_grace_seconds: 5,
        },
        tls: None,
        auth: AuthConfig {
            credentials: None,
            require_auth: false,
            allow_insecure_auth: false,
        },
        dkim: Some(DkimConfig {
            domain: "b".to_string(),
            selector: "relay".to_string(),
            private_key_path: fixture("dkim_private.pem"),
            headers: vec!["From".to_string(), "To".to_string(), "Subject".to_string()],
        }),
        forward: ForwardConfig {
            ports: vec![25],
            helo_name: "email_service".to_string(),
            timeout_seconds: 5,
        },
    }
}

pub fn with_credentials(mut config: RelayConfig) -> RelayConfig {
    config.auth.credentials = Some(Credentials {
        username: USERNAME.to_string(),
        password: PASSWORD.to_string(),
    });
    config
}

pub fn with_tls(mut config: RelayConfig) -> RelayConfig {
    config.tls = Some(TlsConfig {
        cert_path: fixture("tls_cert.pem"),
        key_path: fixture("tls_key.pem"),
    });
    config
}

/// Every domain has a single exchanger, `mx.<domain>`.
pub struct FixedResolver;

#[async_trait]
impl MxResolver for FixedResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<String>, ForwardError> {
        Ok(vec![format!("mx.{}", domain)])
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub recipient: String,
    pub message: Vec<u8>,
}

/// Hands every outbound transaction to the test instead of the network.
pub struct CapturingRelay {
    tx: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl Relay for CapturingRelay {
    async fn send(
        &self,
        host: &str,
        port: u16,
        sender: &str,
        recipient: &str,
        message: &[u8],
    ) -> Result<(), ForwardError> {
        self.tx
            .send(Delivery {
                host: host.to_string(),
                port,
                sender: sender.to_string(),
                recipient: recipient.to_string(),
                message: message.to_vec(),
            })
            .map_err(|e| ForwardError::Transient(e.to_string()))
    }
}

pub struct Outbox {
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl Outbox {
    pub async fn next(&self) -> Delivery {
        tokio::time::timeout(Duration::from_secs(5), self.rx.lock().await.recv())
            .await
            .expect("no delivery within 5s")
            .expect("relay channel closed")
    }

    pub async fn is_empty(&self) -> bool {
        self.rx.lock().await.try_recv().is_err()
    }
}

pub fn capturing_relay() -> (CapturingRelay, Outbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CapturingRelay { tx }, Outbox { rx: Mutex::new(rx) })
}

/// Build a relay forwarding through `relay` and open one in-memory client
/// connection to it.
pub fn serve_one(
    config: RelayConfig,
    relay: Arc<dyn Relay>,
) -> (Arc<SmtpServer>, Client<tokio::io::DuplexStream>) {
    let server = Arc::new(build_server(&config, Arc::new(FixedResolver), relay).expect("relay builds"));

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let conn = Arc::clone(&server);
    tokio::spawn(async move { conn.handle_connection(server_io, peer).await });

    (server, Client::new(client_io))
}

/// Open one in-memory client connection to a relay built from `config`.
pub fn connect(config: RelayConfig) -> (Client<tokio::io::DuplexStream>, Outbox) {
    let (relay, outbox) = capturing_relay();
    let (_, client) = serve_one(config, Arc::new(relay));
    (client, outbox)
}

pub struct Client<S> {
    reader: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(io: S) -> Self {
        Self {
            reader: BufReader::new(io),
        }
    }

    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let io = self.reader.get_mut();
        io.write_all(bytes).await.unwrap();
        io.flush().await.unwrap();
    }

    /// Read one full reply: its code and the text of each line.
    pub async fn reply(&mut self) -> (u16, Vec<String>) {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await.unwrap();
            assert!(n > 0, "connection closed while reading a reply");
            let line = line.trim_end().to_string();
            let code = line[..3].parse::<u16>().unwrap();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line.get(4..).unwrap_or("").to_string());
            if last {
                return (code, lines);
            }
        }
    }

    pub async fn code(&mut self) -> u16 {
        self.reply().await.0
    }

    /// Send a command line and return the reply code.
    pub async fn cmd(&mut self, line: &str) -> u16 {
        self.send_raw(format!("{}\r\n", line).as_bytes()).await;
        self.code().await
    }

    /// `true` once the server has closed the connection.
    pub async fn closed(&mut self) -> bool {
        let mut rest = Vec::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.reader.read_to_end(&mut rest)).await,
            Ok(Ok(_))
        )
    }

    /// MAIL, RCPT and DATA for one message; returns the final reply code.
    pub async fn transaction(&mut self, from: &str, to: &[&str], body: &[u8]) -> u16 {
        assert_eq!(self.cmd(&format!("MAIL FROM:<{}>", from)).await, 250);
        for rcpt in to {
            assert_eq!(self.cmd(&format!("RCPT TO:<{}>", rcpt)).await, 250);
        }
        assert_eq!(self.cmd("DATA").await, 354);
        self.send_raw(body).await;
        self.send_raw(b".\r\n").await;
        self.code().await
    }
}

pub fn auth_plain(user: &str, pass: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(format!("\0{}\0{}", user, pass))
}

/// A message of exactly `len` bytes, CRLF-terminated.
pub fn message_of_len(len: usize) -> Vec<u8> {
    let mut body = b"From: a@b\r\nTo: c@d\r\nSubject: hello\r\n\r\n".to_vec();
    assert!(len >= body.len() + 2);
    body.resize(len - 2, b'x');
    body.extend_from_slice(b"\r\n");
    body
}
