//! Argon2id password encoding.
//!
//! Encoded form: `$argon2id$v=19$m=<mem>,t=<iter>,p=<par>$<b64salt>$<b64hash>`
//! with unpadded standard base64. Parameters travel with the hash, so changing
//! [`HashParams`] only affects newly encoded values.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use rand::RngCore;
use subtle::ConstantTimeEq;
use thiserror::Error;

const ALGORITHM: &str = "argon2id";
const VERSION: u32 = 0x13;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Malformed password hash")]
    MalformedHash,

    #[error("Unsupported argon2 version: {0}")]
    UnsupportedVersion(u32),

    #[error("Failed to decode password hash: {0}")]
    DecodeError(String),

    #[error("Failed to hash password: {0}")]
    Hash(String),
}

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(**redacted**)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    /// Memory cost in KiB.
    pub memory: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub key_length: u32,
    pub salt_length: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory: 32 * 1024,
            iterations: 3,
            parallelism: 4,
            key_length: 32,
            salt_length: 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    params: HashParams,
}

impl PasswordHasher {
    pub fn new(params: HashParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &HashParams {
        &self.params
    }

    pub fn encode(&self, password: &str) -> Result<String, PasswordError> {
        let mut salt = vec![0u8; self.params.salt_length as usize];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let hash = derive(
            password.as_bytes(),
            &salt,
            self.params.memory,
            self.params.iterations,
            self.params.parallelism,
            self.params.key_length as usize,
        )?;

        Ok(format!(
            "${}$v={}$m={},t={},p={}${}${}",
            ALGORITHM,
            VERSION,
            self.params.memory,
            self.params.iterations,
            self.params.parallelism,
            STANDARD_NO_PAD.encode(&salt),
            STANDARD_NO_PAD.encode(&hash),
        ))
    }

    /// Check `password` against an encoded hash. `Ok(false)` means a well-formed
    /// hash that does not match.
    pub fn verify(&self, encoded: &str, password: &str) -> Result<bool, PasswordError> {
        let parsed = ParsedHash::parse(encoded)?;
        let derived = derive(
            password.as_bytes(),
            &parsed.salt,
            parsed.memory,
            parsed.iterations,
            parsed.parallelism,
            parsed.hash.len(),
        )?;
        Ok(derived.ct_eq(&parsed.hash).into())
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(HashParams::default())
    }
}

struct ParsedHash {
    memory: u32,
    iterations: u32,
    parallelism: u32,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl ParsedHash {
    fn parse(encoded: &str) -> Result<Self, PasswordError> {
        let parts: Vec<&str> = encoded.split('$').collect();
        // leading '$' yields an empty first segment
        if parts.len() != 6 || !parts[0].is_empty() || parts[1] != ALGORITHM {
            return Err(PasswordError::MalformedHash);
        }

        let version: u32 = parts[2]
            .strip_prefix("v=")
            .and_then(|v| v.parse().ok())
            .ok_or(PasswordError::MalformedHash)?;
        if version != VERSION {
            return Err(PasswordError::UnsupportedVersion(version));
        }

        let (mut memory, mut iterations, mut parallelism) = (None, None, None);
        for pair in parts[3].split(',') {
            let (name, value) = pair.split_once('=').ok_or(PasswordError::MalformedHash)?;
            let value: u32 = value.parse().map_err(|_| PasswordError::MalformedHash)?;
            match name {
                "m" => memory = Some(value),
                "t" => iterations = Some(value),
                "p" => parallelism = Some(value),
                _ => return Err(PasswordError::MalformedHash),
            }
        }

        let salt = STANDARD_NO_PAD
            .decode(parts[4])
            .map_err(|e| PasswordError::DecodeError(e.to_string()))?;
        let hash = STANDARD_NO_PAD
            .decode(parts[5])
            .map_err(|e| PasswordError::DecodeError(e.to_string()))?;
        if hash.is_empty() {
            return Err(PasswordError::MalformedHash);
        }

        Ok(Self {
            memory: memory.ok_or(PasswordError::MalformedHash)?,
            iterations: iterations.ok_or(PasswordError::MalformedHash)?,
            parallelism: parallelism.ok_or(PasswordError::MalformedHash)?,
            salt,
            hash,
        })
    }
}

fn derive(
    password: &[u8],
    salt: &[u8],
    memory: u32,
    iterations: u32,
    parallelism: u32,
    length: usize,
) -> Result<Vec<u8>, PasswordError> {
    let params = Params::new(memory, iterations, parallelism, Some(length))
        .map_err(|e| PasswordError::Hash(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = vec![0u8; length];
    argon2
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| PasswordError::Hash(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small memory cost keeps the unit tests fast.
    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::new(HashParams {
            memory: 1024,
            iterations: 1,
            parallelism: 1,
            ..HashParams::default()
        })
    }

    #[test]
    fn test_encode_format_and_verify() {
        let hasher = PasswordHasher::default();
        let encoded = hasher.encode("Correct horse battery staple").unwrap();

        assert!(encoded.starts_with("$argon2id$v=19$m=32768,t=3,p=4$"));
        assert!(!encoded.ends_with('='));
        assert!(hasher.verify(&encoded, "Correct horse battery staple").unwrap());
        assert!(!hasher.verify(&encoded, "wrong").unwrap());
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let hasher = fast_hasher();
        let a = hasher.encode("mySecurePassword123").unwrap();
        let b = hasher.encode("mySecurePassword123").unwrap();

        // Random salt
        assert_ne!(a, b);
        assert!(hasher.verify(&a, "mySecurePassword123").unwrap());
        assert!(hasher.verify(&b, "mySecurePassword123").unwrap());
    }

    #[test]
    fn test_verify_uses_embedded_params() {
        let encoded = fast_hasher().encode("pw").unwrap();
        // A hasher configured differently still verifies older encodings
        assert!(PasswordHasher::default().verify(&encoded, "pw").unwrap());
    }

    #[test]
    fn test_rejects_malformed_hashes() {
        let hasher = fast_hasher();
        for bad in [
            "",
            "plaintext",
            "$argon2i$v=19$m=1024,t=1,p=1$c2FsdA$aGFzaA",
            "$argon2id$v=19$m=1024,t=1$c2FsdA$aGFzaA",
            "$argon2id$v=19$m=1024,t=1,p=1,x=2$c2FsdA$aGFzaA",
            "$argon2id$19$m=1024,t=1,p=1$c2FsdA$aGFzaA",
        ] {
            assert!(
                matches!(hasher.verify(bad, "pw"), Err(PasswordError::MalformedHash)),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let encoded = fast_hasher().encode("pw").unwrap().replace("v=19", "v=16");
        assert!(matches!(
            fast_hasher().verify(&encoded, "pw"),
            Err(PasswordError::UnsupportedVersion(16))
        ));
    }

    #[test]
    fn test_rejects_bad_base64() {
        let encoded = "$argon2id$v=19$m=1024,t=1,p=1$!!!$aGFzaA";
        assert!(matches!(
            fast_hasher().verify(encoded, "pw"),
            Err(PasswordError::DecodeError(_))
        ));
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let pw = Password::new("hunter2".to_string());
        assert!(!format!("{:?}", pw).contains("hunter2"));
    }
}
