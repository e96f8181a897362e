//! email-relay: accepts local SMTP submissions, DKIM-signs them and
//! forwards each recipient's copy to its mail exchanger.

pub mod config;
pub mod dkim;
pub mod forwarder;
pub mod smtp;
pub mod tls;

use std::sync::Arc;
use std::time::Duration;

use service_core::error::AppError;

use crate::config::RelayConfig;
use crate::dkim::DkimSigner;
use crate::forwarder::{Forwarder, MxResolver, Relay};
use crate::smtp::{CommandHandler, Limits, Policy, SmtpServer};

/// Wire the SMTP front to a forwarder using `resolver` and `relay` for
/// outbound delivery.
pub fn build_server(
    config: &RelayConfig,
    resolver: Arc<dyn MxResolver>,
    relay: Arc<dyn Relay>,
) -> Result<SmtpServer, AppError> {
    let tls = config
        .tls
        .as_ref()
        .map(|t| tls::load_acceptor(&t.cert_path, &t.key_path))
        .transpose()?;

    let signer = match &config.dkim {
        Some(dkim) => {
            let signer = DkimSigner::from_pem_file(
                &dkim.domain,
                &dkim.selector,
                dkim.headers.clone(),
                &dkim.private_key_path,
            )
            .map_err(|e| AppError::ConfigError(e.into()))?;
            tracing::info!(domain = %dkim.domain, selector = %dkim.selector, "DKIM signing enabled");
            Some(Arc::new(signer))
        }
        None => {
            tracing::warn!("DKIM_PRIVATE_KEY_PATH not set, forwarding unsigned");
            None
        }
    };

    let forwarder = Forwarder::new(resolver, relay, signer, config.forward.ports.clone());

    let handler = CommandHandler::new(Policy {
        hostname: config.smtp.hostname.clone(),
        max_recipients: config.smtp.max_recipients,
        max_message_bytes: config.smtp.max_message_bytes,
        tls_available: tls.is_some(),
        credentials: config.auth.credentials.clone(),
        require_auth: config.auth.require_auth,
        allow_insecure_auth: config.auth.allow_insecure_auth,
    });

    let limits = Limits {
        max_line_length: config.smtp.max_line_length,
        max_message_bytes: config.smtp.max_message_bytes,
        idle_timeout: Duration::from_secs(config.smtp.idle_timeout_seconds),
        data_timeout: Duration::from_secs(config.smtp.data_timeout_seconds),
    };

    Ok(SmtpServer::new(handler, limits, tls, Arc::new(forwarder)))
}
