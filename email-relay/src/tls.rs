use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::Context;
use service_core::error::AppError;
use tokio_rustls::rustls::crypto::ring::default_provider;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Build the STARTTLS acceptor from a PEM certificate chain and private key.
pub fn load_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, AppError> {
    build(cert_path, key_path).map_err(AppError::ConfigError)
}

fn build(cert_path: &str, key_path: &str) -> anyhow::Result<TlsAcceptor> {
    let mut cert_reader = BufReader::new(
        File::open(cert_path).with_context(|| format!("Failed to open certificate {}", cert_path))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {}", cert_path))?;
    if certs.is_empty() {
        anyhow::bail!("No certificate found in {}", cert_path);
    }

    let mut key_reader = BufReader::new(
        File::open(key_path).with_context(|| format!("Failed to open private key {}", key_path))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("Failed to parse private key {}", key_path))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {}", key_path))?;

    let config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()
        .context("Unsupported TLS protocol configuration")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Certificate and key do not match")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
