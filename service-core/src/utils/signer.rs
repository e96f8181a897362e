//! RSA-PSS (SHA-256) signing for service-to-service access tokens.
//!
//! The auth service holds the private key and publishes the public half as
//! base64(PKCS#1 DER) on `/key/signer`. Other services verify tokens through
//! a [`PublicKeyProvider`], typically [`RemotePublicKeyProvider`], which
//! fetches the key once and keeps it until restart.

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::observability::inject_trace_context;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed token")]
    MalformedToken,

    #[error("Token expired")]
    Expired,

    #[error("Failed to fetch public key: {0}")]
    Fetch(String),
}

/// Holds the private key and signs with RSA-PSS/SHA-256.
#[derive(Clone)]
pub struct Signer {
    signing_key: BlindedSigningKey<Sha256>,
    public_key: RsaPublicKey,
}

impl Signer {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        let public_key = private_key.to_public_key();
        Self {
            signing_key: BlindedSigningKey::<Sha256>::new(private_key),
            public_key,
        }
    }

    /// Load a PEM private key, PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1
    /// (`BEGIN RSA PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> Result<Self, SignerError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn from_pem_file(path: &str) -> Result<Self, SignerError> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| SignerError::InvalidKey(format!("{}: {}", path, e)))?;
        Self::from_pem(&pem)
    }

    /// Sign `data`, returning base64url(signature).
    pub fn sign(&self, data: &[u8]) -> String {
        let mut rng = rand::thread_rng();
        let signature = self.signing_key.sign_with_rng(&mut rng, data);
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    }

    pub fn verify(&self, data: &[u8], signature_b64: &str) -> Result<(), SignerError> {
        verify_with_key(&self.public_key, data, signature_b64)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// PKCS#1 DER encoding of the public key.
    pub fn public_key_der(&self) -> Result<Vec<u8>, SignerError> {
        self.public_key
            .to_pkcs1_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))
    }

    /// Body of the `/key/signer` response.
    pub fn published_key(&self) -> Result<PublishedKey, SignerError> {
        Ok(PublishedKey {
            public_key: STANDARD.encode(self.public_key_der()?),
        })
    }

    /// Serialize `claims` and sign them: `base64url(json).base64url(sig)`.
    pub fn issue<T: Serialize>(&self, claims: &T) -> Result<String, SignerError> {
        let json = serde_json::to_vec(claims).map_err(|_| SignerError::MalformedToken)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = self.sign(payload.as_bytes());
        Ok(format!("{}.{}", payload, signature))
    }
}

pub fn verify_with_key(
    public_key: &RsaPublicKey,
    data: &[u8],
    signature_b64: &str,
) -> Result<(), SignerError> {
    let raw = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| SignerError::InvalidSignature)?;
    let signature = Signature::try_from(raw.as_slice()).map_err(|_| SignerError::InvalidSignature)?;
    VerifyingKey::<Sha256>::new(public_key.clone())
        .verify(data, &signature)
        .map_err(|_| SignerError::InvalidSignature)
}

/// Parse a DER public key in either PKCS#1 or PKIX (SubjectPublicKeyInfo) form.
pub fn parse_public_key_der(der: &[u8]) -> Result<RsaPublicKey, SignerError> {
    RsaPublicKey::from_pkcs1_der(der)
        .or_else(|_| RsaPublicKey::from_public_key_der(der))
        .map_err(|e| SignerError::InvalidKey(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedKey {
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Principal (user id).
    pub sub: String,
    /// Session the token was minted for, when issued to a browser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// OAuth client the token was minted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

impl AccessTokenClaims {
    pub fn new(sub: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            sub: sub.into(),
            sid: None,
            client_id: None,
            exp: chrono::Utc::now().timestamp() + ttl_seconds,
        }
    }
}

#[async_trait]
pub trait PublicKeyProvider: Send + Sync {
    async fn public_key(&self) -> Result<RsaPublicKey, SignerError>;
}

#[async_trait]
impl PublicKeyProvider for Signer {
    async fn public_key(&self) -> Result<RsaPublicKey, SignerError> {
        Ok(self.public_key.clone())
    }
}

pub struct StaticPublicKey(pub RsaPublicKey);

#[async_trait]
impl PublicKeyProvider for StaticPublicKey {
    async fn public_key(&self) -> Result<RsaPublicKey, SignerError> {
        Ok(self.0.clone())
    }
}

/// Fetches the signer's public key over HTTP(S) on first use and caches it.
/// A failed fetch is not cached.
pub struct RemotePublicKeyProvider {
    client: reqwest::Client,
    url: String,
    key: OnceCell<RsaPublicKey>,
}

impl RemotePublicKeyProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            key: OnceCell::new(),
        }
    }

    async fn fetch(&self) -> Result<RsaPublicKey, SignerError> {
        tracing::info!(url = %self.url, "Fetching signer public key");

        let mut headers = reqwest::header::HeaderMap::new();
        inject_trace_context(&mut headers);

        let response = self
            .client
            .get(&self.url)
            .headers(headers)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SignerError::Fetch(e.to_string()))?;
        let body: PublishedKey = response
            .json()
            .await
            .map_err(|e| SignerError::Fetch(e.to_string()))?;
        let der = STANDARD
            .decode(body.public_key.trim())
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        parse_public_key_der(&der)
    }
}

#[async_trait]
impl PublicKeyProvider for RemotePublicKeyProvider {
    async fn public_key(&self) -> Result<RsaPublicKey, SignerError> {
        self.key
            .get_or_try_init(|| self.fetch())
            .await
            .cloned()
    }
}

/// Verify a token produced by [`Signer::issue`] and decode its claims.
/// Does not check expiry; see [`verify_access_token`].
pub async fn verify_token<T: DeserializeOwned>(
    token: &str,
    provider: &dyn PublicKeyProvider,
) -> Result<T, SignerError> {
    let (payload, signature) = token.split_once('.').ok_or(SignerError::MalformedToken)?;
    let key = provider.public_key().await?;
    verify_with_key(&key, payload.as_bytes(), signature)?;

    let json = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| SignerError::MalformedToken)?;
    serde_json::from_slice(&json).map_err(|_| SignerError::MalformedToken)
}

/// Verify an access token's signature and expiry.
pub async fn verify_access_token(
    token: &str,
    provider: &dyn PublicKeyProvider,
) -> Result<AccessTokenClaims, SignerError> {
    let claims: AccessTokenClaims = verify_token(token, provider).await?;
    if claims.exp <= chrono::Utc::now().timestamp() {
        return Err(SignerError::Expired);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, OnceLock};

    fn test_key() -> RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| {
            RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate test key")
        })
        .clone()
    }

    #[test]
    fn test_sign_verify() {
        let signer = Signer::new(test_key());
        let sig = signer.sign(b"hello");
        assert!(signer.verify(b"hello", &sig).is_ok());
        assert!(matches!(
            signer.verify(b"hellp", &sig),
            Err(SignerError::InvalidSignature)
        ));
        assert!(signer.verify(b"hello", "not base64!").is_err());
    }

    #[test]
    fn test_loads_pkcs8_and_pkcs1_pem() {
        let key = test_key();
        let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let pkcs1 = key.to_pkcs1_pem(LineEnding::LF).unwrap();

        let a = Signer::from_pem(&pkcs8).unwrap();
        let b = Signer::from_pem(&pkcs1).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert!(Signer::from_pem("-----BEGIN NONSENSE-----").is_err());
    }

    #[test]
    fn test_public_key_der_formats() {
        let signer = Signer::new(test_key());
        let pkcs1 = signer.public_key_der().unwrap();
        let pkix = signer.public_key().to_public_key_der().unwrap();

        assert_eq!(&parse_public_key_der(&pkcs1).unwrap(), signer.public_key());
        assert_eq!(
            &parse_public_key_der(pkix.as_bytes()).unwrap(),
            signer.public_key()
        );
    }

    #[tokio::test]
    async fn test_access_token_roundtrip() {
        let signer = Signer::new(test_key());
        let mut claims = AccessTokenClaims::new("user-1", 300);
        claims.client_id = Some("client".to_string());

        let token = signer.issue(&claims).unwrap();
        let verified = verify_access_token(&token, &signer).await.unwrap();
        assert_eq!(verified, claims);
    }

    #[tokio::test]
    async fn test_expired_and_tampered_tokens_rejected() {
        let signer = Signer::new(test_key());

        let expired = signer.issue(&AccessTokenClaims::new("u", -1)).unwrap();
        assert!(matches!(
            verify_access_token(&expired, &signer).await,
            Err(SignerError::Expired)
        ));

        let token = signer.issue(&AccessTokenClaims::new("u", 300)).unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&AccessTokenClaims::new("admin", 300)).unwrap(),
        );
        let (_, sig) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", forged_payload, sig);
        assert!(matches!(
            verify_access_token(&forged, &signer).await,
            Err(SignerError::InvalidSignature)
        ));
        assert!(matches!(
            verify_access_token("garbage", &signer).await,
            Err(SignerError::MalformedToken)
        ));
    }

    #[tokio::test]
    async fn test_remote_provider_fetches_once() {
        use axum::{routing::get, Json, Router};

        let signer = Signer::new(test_key());
        let published = signer.published_key().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let app = Router::new().route(
            "/key/signer",
            get(move || {
                let counter = counter.clone();
                let published = published.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(published)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = RemotePublicKeyProvider::new(format!("http://{}/key/signer", addr));
        let token = signer.issue(&AccessTokenClaims::new("u", 300)).unwrap();

        assert!(verify_access_token(&token, &provider).await.is_ok());
        assert!(verify_access_token(&token, &provider).await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_provider_does_not_cache_failures() {
        let provider = RemotePublicKeyProvider::new("http://127.0.0.1:9/key/signer");
        assert!(matches!(
            provider.public_key().await,
            Err(SignerError::Fetch(_))
        ));
        assert!(provider.key.get().is_none());
    }
}
