use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::templates::{TemplateData, TemplateSet};
use super::ServiceError;
use crate::config::SmtpConfig;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Render `template` with `data` and send it to `to`.
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        data: &TemplateData,
    ) -> Result<(), ServiceError>;
}

/// Sends through an SMTP submission server with STARTTLS and credentials.
#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    templates: Arc<TemplateSet>,
}

impl EmailService {
    pub fn new(config: &SmtpConfig, templates: Arc<TemplateSet>) -> Result<Self, ServiceError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| ServiceError::Email(e.to_string()))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer: builder.build(),
            from_address: config.from_address.clone(),
            templates,
        })
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        data: &TemplateData,
    ) -> Result<(), ServiceError> {
        let body = self.templates.render(template, data)?;
        let subject = self.templates.subject(template)?;

        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|e: lettre::address::AddressError| ServiceError::Email(e.to_string()))?,
            )
            .to(to
                .parse()
                .map_err(|e: lettre::address::AddressError| ServiceError::Validation(e.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| ServiceError::Email(e.to_string()))?;

        match self.mailer.send(email).await {
            Ok(_) => {
                tracing::info!(to = %to, template = %template, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to, template = %template, "Failed to send email");
                Err(ServiceError::Email(e.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub template: String,
    pub data: TemplateData,
}

/// Records messages instead of sending them.
#[derive(Clone, Default)]
pub struct MockEmailService {
    sent: Arc<Mutex<Vec<SentEmail>>>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Most recent message rendered from `template`.
    pub fn last(&self, template: &str) -> Option<SentEmail> {
        self.sent()
            .into_iter()
            .rev()
            .find(|email| email.template == template)
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        data: &TemplateData,
    ) -> Result<(), ServiceError> {
        tracing::info!(to = %to, template = %template, "Mock email recorded");
        self.sent
            .lock()
            .map_err(|e| ServiceError::Email(e.to_string()))?
            .push(SentEmail {
                to: to.to_string(),
                template: template.to_string(),
                data: data.clone(),
            });
        Ok(())
    }
}
