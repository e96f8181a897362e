use serde::Deserialize;
use service_core::config::{self as core_config, get_env, parse_env};
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Prometheus scrape listener; no exporter when unset.
    pub metrics_port: Option<u16>,
    pub smtp: SmtpConfig,
    pub tls: Option<TlsConfig>,
    pub auth: AuthConfig,
    pub dkim: Option<DkimConfig>,
    pub forward: ForwardConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Name used in the greeting and EHLO replies.
    pub hostname: String,
    pub listen_port: u16,
    pub max_message_bytes: usize,
    pub max_recipients: usize,
    pub max_line_length: usize,
    pub idle_timeout_seconds: u64,
    pub data_timeout_seconds: u64,
    /// How long shutdown waits for accepted messages to be forwarded.
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub credentials: Option<Credentials>,
    /// Submission mode: MAIL is refused until the client authenticates.
    pub require_auth: bool,
    /// Permit AUTH over a plaintext connection.
    pub allow_insecure_auth: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DkimConfig {
    pub domain: String,
    pub selector: String,
    pub private_key_path: String,
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    pub ports: Vec<u16>,
    pub helo_name: String,
    pub timeout_seconds: u64,
}

pub const DEFAULT_DKIM_HEADERS: &str = "From:To:Cc:Subject:Date:Message-ID:MIME-Version:Content-Type";

impl RelayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let environment: Environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let hostname = get_env("SMTP_HOSTNAME", Some("email_service"), is_prod)?;

        let tls = match (env::var("SMTP_TLS_CERT_PATH"), env::var("SMTP_TLS_KEY_PATH")) {
            (Ok(cert_path), Ok(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            _ => None,
        };

        let credentials = match (env::var("SMTP_AUTH_USERNAME"), env::var("SMTP_AUTH_PASSWORD")) {
            (Ok(username), Ok(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        let dkim = match env::var("DKIM_PRIVATE_KEY_PATH") {
            Ok(private_key_path) => Some(DkimConfig {
                domain: get_env("DKIM_DOMAIN", None, is_prod)?,
                selector: get_env("DKIM_SELECTOR", Some("default"), is_prod)?,
                private_key_path,
                headers: split_list(
                    &get_env("DKIM_HEADERS", Some(DEFAULT_DKIM_HEADERS), is_prod)?,
                    ':',
                ),
            }),
            Err(_) => None,
        };

        let ports = split_list(&get_env("FORWARD_PORTS", Some("25,587,2525"), is_prod)?, ',')
            .iter()
            .map(|p| {
                p.parse::<u16>().map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("FORWARD_PORTS has an invalid port '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = RelayConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("email-relay"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: common_config.otlp_endpoint,
            metrics_port: env::var("METRICS_PORT")
                .ok()
                .map(|p| {
                    p.parse::<u16>().map_err(|e| {
                        AppError::ConfigError(anyhow::anyhow!("METRICS_PORT is invalid: {}", e))
                    })
                })
                .transpose()?,
            smtp: SmtpConfig {
                listen_port: parse_env("SMTP_PORT", Some("2525"), is_prod)?,
                max_message_bytes: parse_env("SMTP_MAX_MESSAGE_BYTES", Some("10485760"), is_prod)?,
                max_recipients: parse_env("SMTP_MAX_RECIPIENTS", Some("50"), is_prod)?,
                max_line_length: parse_env("SMTP_MAX_LINE_LENGTH", Some("1000"), is_prod)?,
                idle_timeout_seconds: parse_env("SMTP_IDLE_TIMEOUT_SECONDS", Some("300"), is_prod)?,
                data_timeout_seconds: parse_env("SMTP_DATA_TIMEOUT_SECONDS", Some("600"), is_prod)?,
                shutdown_grace_seconds: parse_env("SMTP_SHUTDOWN_GRACE_SECONDS", Some("30"), is_prod)?,
                hostname: hostname.clone(),
            },
            tls,
            auth: AuthConfig {
                credentials,
                require_auth: parse_env("SMTP_REQUIRE_AUTH", Some("false"), is_prod)?,
                allow_insecure_auth: parse_env("SMTP_ALLOW_INSECURE_AUTH", Some("false"), is_prod)?,
            },
            dkim,
            forward: ForwardConfig {
                ports,
                helo_name: get_env("FORWARD_HELO_NAME", Some(&hostname), is_prod)?,
                timeout_seconds: parse_env("FORWARD_TIMEOUT_SECONDS", Some("30"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.smtp.listen_port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP_PORT must be greater than 0"
            )));
        }

        if self.smtp.max_message_bytes == 0 || self.smtp.max_recipients == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Message size and recipient limits must be positive"
            )));
        }

        // Room for the longest command plus CRLF
        if self.smtp.max_line_length < 512 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP_MAX_LINE_LENGTH must be at least 512"
            )));
        }

        if self.auth.require_auth && self.auth.credentials.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SMTP_REQUIRE_AUTH needs SMTP_AUTH_USERNAME and SMTP_AUTH_PASSWORD"
            )));
        }

        if self.forward.ports.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "FORWARD_PORTS must list at least one port"
            )));
        }

        Ok(())
    }
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
