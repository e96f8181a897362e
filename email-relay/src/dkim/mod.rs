//! DKIM signing (RFC 6376), `relaxed/relaxed` with `rsa-sha256`.

pub mod canonicalize;
pub mod message;
pub mod signer;

pub use signer::{verify, DkimSigner};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DkimError {
    #[error("Invalid DKIM key: {0}")]
    InvalidKey(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("No DKIM-Signature header")]
    MissingSignature,

    #[error("Unsupported DKIM parameters: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Body hash does not match")]
    BodyHashMismatch,

    #[error("Signature does not verify")]
    SignatureMismatch,

    #[error("Signing failed: {0}")]
    Signing(String),
}
