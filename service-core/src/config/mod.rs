use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service binary: listen port and OTLP endpoint.
///
/// Read from an optional `configuration` file and `APP__*` environment
/// variables (e.g. `APP__PORT=9000`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            otlp_endpoint: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Read an environment variable.
///
/// In production every key must be set explicitly; elsewhere `default`
/// applies when the variable is absent.
pub fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match std::env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Read and parse an environment variable, reporting parse failures as config errors.
pub fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, default, is_prod)?;
    raw.trim().parse::<T>().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e))
    })
}
