//! Outbound delivery: one SMTP transaction per recipient, tried against the
//! recipient domain's mail exchangers in preference order and, for each, the
//! configured port list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use lettre::address::{Address, Envelope as SmtpEnvelope};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use thiserror::Error;

use crate::config::ForwardConfig;
use crate::dkim::DkimSigner;
use crate::smtp::command::domain_of;
use crate::smtp::{Envelope, MessageSink};

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("No mail exchanger for {0}")]
    NoMailExchanger(String),

    #[error("DNS lookup failed: {0}")]
    Resolve(String),

    /// Worth trying the next host or port.
    #[error("Delivery attempt failed: {0}")]
    Transient(String),

    /// The remote server refused the message for good.
    #[error("Message rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Mail exchangers for `domain`, most preferred first.
    async fn resolve(&self, domain: &str) -> Result<Vec<String>, ForwardError>;
}

#[async_trait]
pub trait Relay: Send + Sync {
    /// One complete client transaction: connect, EHLO, MAIL, RCPT, DATA, QUIT.
    async fn send(
        &self,
        host: &str,
        port: u16,
        sender: &str,
        recipient: &str,
        message: &[u8],
    ) -> Result<(), ForwardError>;
}

pub struct HickoryMxResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryMxResolver {
    /// Resolver configured from the host's resolv.conf.
    pub fn from_system_conf() -> Result<Self, ForwardError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| ForwardError::Resolve(e.to_string()))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl MxResolver for HickoryMxResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<String>, ForwardError> {
        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            // No MX records: the domain itself is the implicit exchanger
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                return Ok(vec![domain.to_string()]);
            }
            Err(e) => return Err(ForwardError::Resolve(e.to_string())),
        };

        let mut records: Vec<(u16, String)> = lookup
            .iter()
            .map(|mx| {
                let host = mx.exchange().to_utf8();
                (mx.preference(), host.trim_end_matches('.').to_string())
            })
            .collect();
        records.sort_by_key(|(preference, _)| *preference);

        // A lone "." exchanger means the domain accepts no mail
        Ok(records
            .into_iter()
            .map(|(_, host)| host)
            .filter(|host| !host.is_empty())
            .collect())
    }
}

/// Delivers with lettre, upgrading with STARTTLS when the server offers it.
pub struct LettreRelay {
    helo_name: String,
    timeout: Duration,
}

impl LettreRelay {
    pub fn new(config: &ForwardConfig) -> Self {
        Self {
            helo_name: config.helo_name.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

#[async_trait]
impl Relay for LettreRelay {
    async fn send(
        &self,
        host: &str,
        port: u16,
        sender: &str,
        recipient: &str,
        message: &[u8],
    ) -> Result<(), ForwardError> {
        let from = if sender.is_empty() {
            None
        } else {
            Some(
                sender
                    .parse::<Address>()
                    .map_err(|e| ForwardError::Rejected(format!("sender {}: {}", sender, e)))?,
            )
        };
        let to = recipient
            .parse::<Address>()
            .map_err(|e| ForwardError::InvalidRecipient(format!("{}: {}", recipient, e)))?;
        let envelope = SmtpEnvelope::new(from, vec![to])
            .map_err(|e| ForwardError::Rejected(e.to_string()))?;

        let tls = TlsParameters::new(host.to_string())
            .map_err(|e| ForwardError::Transient(e.to_string()))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .tls(Tls::Opportunistic(tls))
            .hello_name(ClientId::Domain(self.helo_name.clone()))
            .timeout(Some(self.timeout))
            .build();

        match transport.send_raw(&envelope, message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(ForwardError::Rejected(e.to_string())),
            Err(e) => Err(ForwardError::Transient(e.to_string())),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliverySummary {
    /// `(recipient, "host:port")`
    pub delivered: Vec<(String, String)>,
    /// `(recipient, reason)`
    pub failed: Vec<(String, String)>,
}

pub struct Forwarder {
    resolver: Arc<dyn MxResolver>,
    relay: Arc<dyn Relay>,
    signer: Option<Arc<DkimSigner>>,
    ports: Vec<u16>,
}

impl Forwarder {
    pub fn new(
        resolver: Arc<dyn MxResolver>,
        relay: Arc<dyn Relay>,
        signer: Option<Arc<DkimSigner>>,
        ports: Vec<u16>,
    ) -> Self {
        Self {
            resolver,
            relay,
            signer,
            ports,
        }
    }

    /// Prefix the body with its DKIM signature. A message that cannot be
    /// signed goes out unsigned.
    pub fn prepare(&self, body: &[u8]) -> Vec<u8> {
        let Some(signer) = &self.signer else {
            return body.to_vec();
        };
        match signer.sign(body) {
            Ok(header) => {
                let mut out = Vec::with_capacity(header.len() + body.len());
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(body);
                out
            }
            Err(e) => {
                tracing::error!(error = %e, "DKIM signing failed, forwarding unsigned");
                metrics::counter!("dkim_sign_failures_total").increment(1);
                body.to_vec()
            }
        }
    }

    /// Deliver to every recipient. A failed recipient does not stop the others.
    pub async fn forward(&self, envelope: &Envelope) -> DeliverySummary {
        let message = self.prepare(&envelope.body);
        let mut summary = DeliverySummary::default();

        for recipient in &envelope.recipients {
            match self.deliver_one(&envelope.sender, recipient, &message).await {
                Ok(target) => {
                    tracing::info!(recipient = %recipient, target = %target, "Message forwarded");
                    summary.delivered.push((recipient.clone(), target));
                }
                Err(e) => {
                    tracing::warn!(recipient = %recipient, error = %e, "Forwarding failed");
                    summary.failed.push((recipient.clone(), e.to_string()));
                }
            }
        }

        summary
    }

    async fn deliver_one(
        &self,
        sender: &str,
        recipient: &str,
        message: &[u8],
    ) -> Result<String, ForwardError> {
        let domain = domain_of(recipient)
            .ok_or_else(|| ForwardError::InvalidRecipient(recipient.to_string()))?;
        let hosts = self.resolver.resolve(domain).await?;

        let mut last_error = None;
        for host in &hosts {
            for &port in &self.ports {
                match self.relay.send(host, port, sender, recipient, message).await {
                    Ok(()) => {
                        metrics::counter!("smtp_forward_attempts_total", "outcome" => "delivered")
                            .increment(1);
                        return Ok(format!("{}:{}", host, port));
                    }
                    Err(e @ ForwardError::Rejected(_)) => {
                        metrics::counter!("smtp_forward_attempts_total", "outcome" => "rejected")
                            .increment(1);
                        return Err(e);
                    }
                    Err(e) => {
                        metrics::counter!("smtp_forward_attempts_total", "outcome" => "failed")
                            .increment(1);
                        tracing::debug!(host = %host, port, error = %e, "Delivery attempt failed");
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ForwardError::NoMailExchanger(domain.to_string())))
    }
}

#[async_trait]
impl MessageSink for Forwarder {
    async fn deliver(&self, envelope: Envelope) {
        let summary = self.forward(&envelope).await;
        tracing::info!(
            sender = %envelope.sender,
            delivered = summary.delivered.len(),
            failed = summary.failed.len(),
            "Forwarding finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StaticResolver(HashMap<String, Vec<String>>);

    #[async_trait]
    impl MxResolver for StaticResolver {
        async fn resolve(&self, domain: &str) -> Result<Vec<String>, ForwardError> {
            self.0
                .get(domain)
                .cloned()
                .ok_or_else(|| ForwardError::Resolve(format!("NXDOMAIN {}", domain)))
        }
    }

    /// Accepts only listed `host:port` targets; records every attempt.
    #[derive(Default)]
    struct ScriptedRelay {
        open: Vec<String>,
        rejecting: Vec<String>,
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Relay for ScriptedRelay {
        async fn send(
            &self,
            host: &str,
            port: u16,
            _sender: &str,
            _recipient: &str,
            _message: &[u8],
        ) -> Result<(), ForwardError> {
            let target = format!("{}:{}", host, port);
            self.attempts.lock().unwrap().push(target.clone());
            if self.rejecting.contains(&target) {
                Err(ForwardError::Rejected("550 no such user".into()))
            } else if self.open.contains(&target) {
                Ok(())
            } else {
                Err(ForwardError::Transient("connection refused".into()))
            }
        }
    }

    fn resolver() -> Arc<StaticResolver> {
        Arc::new(StaticResolver(HashMap::from([
            (
                "d.test".to_string(),
                vec!["mx1.d.test".to_string(), "mx2.d.test".to_string()],
            ),
            ("e.test".to_string(), vec!["mx.e.test".to_string()]),
        ])))
    }

    fn envelope(recipients: &[&str]) -> Envelope {
        Envelope {
            sender: "a@b.test".into(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            body: b"Subject: hi\r\n\r\nhello\r\n".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_walks_hosts_then_ports() {
        let relay = Arc::new(ScriptedRelay {
            open: vec!["mx2.d.test:587".into()],
            ..Default::default()
        });
        let forwarder = Forwarder::new(resolver(), relay.clone(), None, vec![25, 587]);

        let summary = forwarder.forward(&envelope(&["c@d.test"])).await;

        assert_eq!(
            summary.delivered,
            vec![("c@d.test".to_string(), "mx2.d.test:587".to_string())]
        );
        assert_eq!(
            *relay.attempts.lock().unwrap(),
            vec!["mx1.d.test:25", "mx1.d.test:587", "mx2.d.test:25", "mx2.d.test:587"]
        );
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_recipients() {
        let relay = Arc::new(ScriptedRelay {
            open: vec!["mx.e.test:25".into()],
            ..Default::default()
        });
        let forwarder = Forwarder::new(resolver(), relay, None, vec![25]);

        let summary = forwarder
            .forward(&envelope(&["c@d.test", "x@unknown.test", "f@e.test"]))
            .await;

        assert_eq!(summary.delivered.len(), 1);
        assert_eq!(summary.delivered[0].0, "f@e.test");
        assert_eq!(summary.failed.len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_rejection_stops_retrying() {
        let relay = Arc::new(ScriptedRelay {
            rejecting: vec!["mx1.d.test:25".into()],
            open: vec!["mx2.d.test:25".into()],
            ..Default::default()
        });
        let forwarder = Forwarder::new(resolver(), relay.clone(), None, vec![25]);

        let summary = forwarder.forward(&envelope(&["c@d.test"])).await;

        assert!(summary.delivered.is_empty());
        assert_eq!(relay.attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsigned_without_signer() {
        let forwarder = Forwarder::new(resolver(), Arc::new(ScriptedRelay::default()), None, vec![25]);
        assert_eq!(forwarder.prepare(b"Subject: x\r\n\r\nbody"), b"Subject: x\r\n\r\nbody");
    }
}
