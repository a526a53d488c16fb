//! Cryptographic primitives backing Store encryption and SealedScroll.
//!
//! # Security Parameters
//! - Key derivation (app isolation): HKDF-SHA256, salt `"nine_s_v1"`.
//! - Key derivation (password envelopes): PBKDF2-HMAC-SHA256, 100,000 iterations.
//! - Encryption: AES-256-GCM, random 96-bit nonces.
//! - All sensitive key material should be zeroized after use.
//!
//! ## Nonce collision risk
//! 96-bit random nonces give ~2^48 encryptions before a 50% collision
//! probability (birthday bound). Acceptable at the write volumes this crate
//! targets; callers encrypting at very high throughput should rotate keys.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

/// Salt binding derived app keys to this protocol, per the HKDF key derivation mode.
const APP_KEY_SALT: &[u8] = b"nine_s_v1";

/// PBKDF2 iteration count for SealedScroll password-based keys.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Sealed value, two-field form (`ciphertext`, `nonce` encoded separately).
///
/// This is the compatibility on-disk format for Store encryption: the
/// canonical form concatenates `nonce || ciphertext || tag` into a single
/// blob (see [`seal_combined`]), but readers must also accept this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedValue {
    pub version: u8,
    pub nonce: String,
    pub ciphertext: String,
}

const SEALED_VERSION: u8 = 1;

/// Zeroize a key in place.
pub fn zeroize_key(key: &mut [u8; 32]) {
    key.zeroize();
}

/// Encrypt data with a 32-byte key, returning the two-field form.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<SealedValue, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(SealedValue {
        version: SEALED_VERSION,
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Decrypt data with a 32-byte key from the two-field form.
pub fn unseal(key: &[u8; 32], sealed: &SealedValue) -> Result<Vec<u8>, CryptoError> {
    if sealed.version != SEALED_VERSION {
        return Err(CryptoError::InvalidData(format!(
            "Unsupported sealed version: {}",
            sealed.version
        )));
    }

    let nonce_bytes = BASE64
        .decode(&sealed.nonce)
        .map_err(|e| CryptoError::InvalidData(e.to_string()))?;
    if nonce_bytes.len() != 12 {
        return Err(CryptoError::InvalidData(
            "Nonce must be 12 bytes".to_string(),
        ));
    }
    let ciphertext = BASE64
        .decode(&sealed.ciphertext)
        .map_err(|e| CryptoError::InvalidData(e.to_string()))?;

    decrypt_raw(key, &nonce_bytes, &ciphertext)
}

/// Encrypt data with a 32-byte key, returning the canonical combined form:
/// `base64(nonce || ciphertext || tag)`.
pub fn seal_combined(key: &[u8; 32], plaintext: &[u8]) -> Result<String, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut combined = Vec::with_capacity(12 + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(combined))
}

/// Decrypt the canonical combined form produced by [`seal_combined`].
pub fn unseal_combined(key: &[u8; 32], combined_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let combined = BASE64
        .decode(combined_b64)
        .map_err(|e| CryptoError::InvalidData(e.to_string()))?;
    if combined.len() < 12 {
        return Err(CryptoError::InvalidData(
            "combined ciphertext shorter than nonce".to_string(),
        ));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(12);
    decrypt_raw(key, nonce_bytes, ciphertext)
}

fn decrypt_raw(key: &[u8; 32], nonce_bytes: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Generate a random 16-byte salt (PBKDF2 / SealedScroll use).
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive an app-specific key from a master key using HKDF-SHA256.
///
/// Salt is fixed (`"nine_s_v1"`) for domain separation between this
/// protocol's key schedule and any other consumer of the master key;
/// `app_key` is the HKDF `info` parameter, binding the output to one
/// application's namespace. Different apps sharing a master key get
/// cryptographically independent derived keys.
pub fn derive_app_key(master_key: &[u8; 32], app_key: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(APP_KEY_SALT), master_key);
    let mut okm = [0u8; 32];
    hk.expand(app_key.as_bytes(), &mut okm)
        .expect("32 is a valid HKDF-SHA256 output length");
    okm
}

/// Derive a 32-byte key from a password using PBKDF2-HMAC-SHA256.
///
/// Used by SealedScroll's password path: 100,000 iterations, 32-byte output.
pub fn derive_password_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let key = [42u8; 32];
        let plaintext = b"secret data";

        let sealed = seal(&key, plaintext).unwrap();
        let decrypted = unseal(&key, &sealed).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = [1u8; 32];
        let key2 = [2u8; 32];
        let plaintext = b"secret";

        let sealed = seal(&key1, plaintext).unwrap();
        assert!(unseal(&key2, &sealed).is_err());
    }

    #[test]
    fn test_seal_combined_roundtrip() {
        let key = [7u8; 32];
        let plaintext = b"combined form payload";

        let combined = seal_combined(&key, plaintext).unwrap();
        let decrypted = unseal_combined(&key, &combined).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_seal_combined_wrong_key_fails() {
        let key1 = [9u8; 32];
        let key2 = [10u8; 32];
        let combined = seal_combined(&key1, b"data").unwrap();
        assert!(unseal_combined(&key2, &combined).is_err());
    }

    #[test]
    fn test_derive_password_key_deterministic() {
        let salt = generate_salt();
        let key1 = derive_password_key("password", &salt);
        let key2 = derive_password_key("password", &salt);
        let key3 = derive_password_key("different", &salt);

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    // ========================================================================
    // App Key Derivation Tests (HKDF)
    // ========================================================================

    #[test]
    fn test_derive_app_key_deterministic() {
        let master = [42u8; 32];

        let key1 = derive_app_key(&master, "inbox");
        let key2 = derive_app_key(&master, "inbox");
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_derive_app_key_different_apps() {
        let master = [42u8; 32];

        let key_inbox = derive_app_key(&master, "inbox");
        let key_contacts = derive_app_key(&master, "contacts");
        let key_calendar = derive_app_key(&master, "calendar");

        assert_ne!(key_inbox, key_contacts);
        assert_ne!(key_inbox, key_calendar);
        assert_ne!(key_contacts, key_calendar);
    }

    #[test]
    fn test_derive_app_key_different_masters() {
        let master1 = [1u8; 32];
        let master2 = [2u8; 32];

        let key1 = derive_app_key(&master1, "inbox");
        let key2 = derive_app_key(&master2, "inbox");

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_derive_app_key_not_truncated_master() {
        let master = [42u8; 32];
        let derived = derive_app_key(&master, "app");

        assert_ne!(derived, master);
    }

    #[test]
    fn test_derive_app_key_cryptographic_isolation() {
        // Simulates two users with different master keys using the same
        // app: neither can decrypt the other's data.
        let user_a_master = [0xAA; 32];
        let user_b_master = [0xBB; 32];

        let user_a_app_key = derive_app_key(&user_a_master, "shared-app");
        let user_b_app_key = derive_app_key(&user_b_master, "shared-app");

        assert_ne!(user_a_app_key, user_b_app_key);

        let plaintext = b"user A secret data";
        let sealed = seal(&user_a_app_key, plaintext).unwrap();

        let decrypted = unseal(&user_a_app_key, &sealed).unwrap();
        assert_eq!(decrypted, plaintext);

        let result = unseal(&user_b_app_key, &sealed);
        assert!(result.is_err());
    }
}
