use serde::Deserialize;
use service_core::config::{self as core_config, get_env, parse_env};
use service_core::error::AppError;
use std::env;

use crate::services::TokenTtls;
use crate::utils::HashParams;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// Public URL of this service, used in email links.
    pub base_url: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub signer: SignerConfig,
    #[serde(skip)]
    pub tokens: TokenTtls,
    #[serde(skip)]
    pub password: HashParams,
    pub access_control: AccessControlConfig,
    pub oauth: OAuthConfig,
    pub smtp: SmtpConfig,
    pub root: RootUserConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// HMAC key binding the session cookie to the session id.
    pub signing_key: String,
    pub ttl_seconds: u64,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    pub private_key_path: String,
    pub access_token_ttl_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessControlConfig {
    /// Policy model file; the built-in deny-overrides model when unset.
    pub model_path: Option<String>,
    pub policy_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub rotate_refresh_tokens: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub template_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootUserConfig {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
    /// Applies to login, registration and password-reset submissions.
    pub login_attempts: u32,
    pub login_window_seconds: u64,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("auth-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            base_url: get_env("BASE_URL", Some("http://localhost:8080"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
                namespace: get_env("REDIS_NAMESPACE", Some("auth"), is_prod)?,
            },
            session: SessionConfig {
                signing_key: get_env("SESSION_SIGNING_KEY", None, is_prod)?,
                ttl_seconds: parse_env("SESSION_TTL_SECONDS", Some("86400"), is_prod)?,
                secure_cookies: parse_env("SESSION_SECURE_COOKIES", Some("true"), is_prod)?,
            },
            signer: SignerConfig {
                private_key_path: get_env("SIGNER_PRIVATE_KEY_PATH", None, is_prod)?,
                access_token_ttl_seconds: parse_env(
                    "ACCESS_TOKEN_TTL_SECONDS",
                    Some("900"),
                    is_prod,
                )?,
            },
            tokens: TokenTtls {
                register: parse_env("TOKEN_TTL_REGISTER_SECONDS", Some("86400"), is_prod)?,
                forgot: parse_env("TOKEN_TTL_FORGOT_SECONDS", Some("3600"), is_prod)?,
                invite: parse_env("TOKEN_TTL_INVITE_SECONDS", Some("259200"), is_prod)?,
                authcode: parse_env("TOKEN_TTL_AUTHCODE_SECONDS", Some("300"), is_prod)?,
                org_invite: parse_env("TOKEN_TTL_ORG_INVITE_SECONDS", Some("259200"), is_prod)?,
            },
            password: HashParams {
                memory: parse_env("ARGON2_MEMORY_KIB", Some("32768"), is_prod)?,
                iterations: parse_env("ARGON2_ITERATIONS", Some("3"), is_prod)?,
                parallelism: parse_env("ARGON2_PARALLELISM", Some("4"), is_prod)?,
                key_length: parse_env("ARGON2_KEY_LENGTH", Some("32"), is_prod)?,
                salt_length: parse_env("ARGON2_SALT_LENGTH", Some("16"), is_prod)?,
            },
            access_control: AccessControlConfig {
                model_path: env::var("ACCESS_CONTROL_MODEL_PATH").ok(),
                policy_cache_ttl_seconds: parse_env(
                    "POLICY_CACHE_TTL_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
            },
            oauth: OAuthConfig {
                rotate_refresh_tokens: parse_env(
                    "OAUTH_ROTATE_REFRESH_TOKENS",
                    Some("false"),
                    is_prod,
                )?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", Some("587"), is_prod)?,
                username: get_env("SMTP_USERNAME", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_address: get_env(
                    "SMTP_FROM_ADDRESS",
                    Some("no-reply@localhost"),
                    is_prod,
                )?,
                template_dir: env::var("TEMPLATE_DIR").ok(),
            },
            root: RootUserConfig {
                email: env::var("ROOT_EMAIL").ok(),
                password: env::var("ROOT_PASSWORD").ok(),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", Some("10"), is_prod)?,
                login_window_seconds: parse_env(
                    "RATE_LIMIT_LOGIN_WINDOW_SECONDS",
                    Some("300"),
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.session.signing_key.len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_SIGNING_KEY must be at least 32 bytes"
            )));
        }

        if self.session.ttl_seconds == 0 || self.signer.access_token_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Session and access token TTLs must be positive"
            )));
        }

        if self.password.salt_length < 8 || self.password.key_length < 16 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ARGON2_SALT_LENGTH must be >= 8 and ARGON2_KEY_LENGTH >= 16"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.session.secure_cookies {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SESSION_SECURE_COOKIES cannot be disabled in production"
                )));
            }
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}
