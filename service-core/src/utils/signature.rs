use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `value` under `key`, base64url encoded without padding.
pub fn generate_mac(key: &[u8], value: &str) -> Result<String, anyhow::Error> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(value.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Bind `value` to `key`: `value.mac`.
pub fn sign_value(key: &[u8], value: &str) -> Result<String, anyhow::Error> {
    Ok(format!("{}.{}", value, generate_mac(key, value)?))
}

/// Check a `value.mac` pair using constant-time comparison and return the
/// value when the MAC matches.
pub fn verify_signed_value(key: &[u8], signed: &str) -> Option<String> {
    let (value, provided) = signed.rsplit_once('.')?;
    if value.is_empty() {
        return None;
    }
    let expected = generate_mac(key, value).ok()?;

    let expected_bytes = expected.as_bytes();
    let provided_bytes = provided.as_bytes();
    if expected_bytes.len() != provided_bytes.len() {
        return None;
    }

    if bool::from(expected_bytes.ct_eq(provided_bytes)) {
        Some(value.to_string())
    } else {
        None
    }
}
