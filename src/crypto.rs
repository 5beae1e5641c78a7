//! Cryptographic operations for webhook secrets and payload signing.
//!
//! - Signing-secret generation and format validation (`whsec_` prefix)
//! - HMAC-SHA256 payload signatures with replay protection via timestamps
//! - AES-256-GCM encryption/decryption for subscription secrets at rest

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::WebhookError;

/// Prefix marking webhook signing secrets, so they are visually
/// distinguishable from other credential types.
pub const SECRET_PREFIX: &str = "whsec_";

/// Number of random bytes in a generated secret (48 hex characters).
const SECRET_BYTES: usize = 24;

/// Default replay-protection window for signature verification, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Signing secrets
// ---------------------------------------------------------------------------

/// Generate a high-entropy signing secret: `whsec_` + 48 hex characters.
pub fn generate_secret() -> String {
    // SECURITY: Use OsRng directly from the operating system's CSPRNG
    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

/// Check that a secret is `whsec_` followed by exactly 48 hex characters.
pub fn is_valid_secret_format(secret: &str) -> bool {
    match secret.strip_prefix(SECRET_PREFIX) {
        Some(suffix) => {
            suffix.len() == SECRET_BYTES * 2 && suffix.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// HMAC-SHA256 payload signing
// ---------------------------------------------------------------------------

/// Compute the signature header value for a payload.
///
/// The signature covers `{timestamp}.{payload}`: binding the timestamp into
/// the signed material is what makes a captured signature unusable outside
/// the tolerance window. The `whsec_` prefix is stripped before keying, so
/// both raw and prefixed secrets are tolerated. Returns `sha256={hex}`.
pub fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
    let key = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a payload signature using constant-time comparison.
///
/// Rejects first if `|now - timestamp|` exceeds the tolerance window (replay
/// protection), then recomputes the expected signature and compares in
/// constant time. Mismatched lengths compare unequal rather than erroring.
pub fn verify(
    payload: &str,
    signature: &str,
    secret: &str,
    timestamp: i64,
    tolerance_secs: i64,
) -> bool {
    let now = chrono::Utc::now().timestamp();
    if (now - timestamp).abs() > tolerance_secs {
        return false;
    }

    let expected = sign(payload, secret, timestamp);
    constant_time_eq(signature.as_bytes(), expected.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
///
/// SECURITY: Uses the `subtle` crate; unequal-length inputs return false.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// AES-256-GCM encryption/decryption (for secrets at rest)
// ---------------------------------------------------------------------------

/// Encrypt a plaintext secret to a base64-encoded string for DB storage.
///
/// Format: base64(nonce || ciphertext || auth_tag)
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    use rand::rngs::OsRng;
    use rand::RngCore;
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result))
}

/// Decrypt a base64-encoded secret from DB storage back to plaintext.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }

    let encrypted = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

    if encrypted.len() < NONCE_SIZE + 1 {
        return Err(WebhookError::EncryptionFailed(
            "Invalid encrypted data format".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
    let ciphertext = &encrypted[NONCE_SIZE..];

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
