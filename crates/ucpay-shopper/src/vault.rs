//! PAN encryption at rest.
//!
//! Card numbers are encrypted with AES-256-GCM under a key only this
//! service holds; the stored blob is the random 96-bit nonce followed by
//! the ciphertext, base64-encoded. Decryption is never required to
//! participate in a mandate: last-four, network, and the per-transaction
//! token/cryptogram are sufficient.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use thiserror::Error;
use ucpay_core::encoding;

/// Errors from the PAN vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The configured key is not 32 bytes of valid base64.
    #[error("invalid vault key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// The stored blob is malformed or the key does not match.
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// AES-256-GCM vault for card numbers.
pub struct PanVault {
    cipher: Aes256Gcm,
}

impl PanVault {
    /// Creates a vault from raw key bytes.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new_from_slice(key).expect("32-byte key"),
        }
    }

    /// Creates a vault from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not decode to 32 bytes.
    pub fn from_encoded_key(encoded: &str) -> Result<Self, VaultError> {
        let bytes = encoding::decode(encoded).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VaultError::InvalidKey("expected 32 bytes".to_string()))?;
        Ok(Self::new(&key))
    }

    /// Generates a fresh base64-encoded key.
    #[must_use]
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        encoding::encode(key)
    }

    /// Encrypts a PAN for storage. Spaces and hyphens are stripped first.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn encrypt(&self, pan: &str) -> Result<String, VaultError> {
        let clean = normalize_pan(pan);

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), clean.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;

        let mut blob = Vec::with_capacity(12 + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(encoding::encode(blob))
    }

    /// Decrypts a stored blob back to the PAN.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is malformed or authentication fails.
    pub fn decrypt(&self, blob: &str) -> Result<String, VaultError> {
        let bytes = encoding::decode(blob).map_err(|e| VaultError::Decrypt(e.to_string()))?;
        if bytes.len() < 12 {
            return Err(VaultError::Decrypt("blob too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(12);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Decrypt("authentication failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| VaultError::Decrypt(e.to_string()))
    }
}

/// Strips spaces and hyphens from a card number.
#[must_use]
pub fn normalize_pan(pan: &str) -> String {
    pan.chars().filter(|c| *c != ' ' && *c != '-').collect()
}

/// Last four digits of a PAN, for display.
#[must_use]
pub fn last_four(pan: &str) -> String {
    let clean = normalize_pan(pan);
    clean
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

/// Detects the card network from the PAN prefix.
#[must_use]
pub fn detect_network(pan: &str) -> &'static str {
    let clean = normalize_pan(pan);
    let prefix = |n: usize| clean.get(..n).and_then(|s| s.parse::<u32>().ok());

    if let Some(p2) = prefix(2) {
        if (51..=55).contains(&p2) {
            return "mastercard";
        }
        if p2 == 34 || p2 == 37 {
            return "amex";
        }
        if p2 == 65 {
            return "discover";
        }
    }
    if let Some(p4) = prefix(4) {
        if (2221..=2720).contains(&p4) {
            return "mastercard";
        }
        if p4 == 6011 {
            return "discover";
        }
    }
    if let Some(p3) = prefix(3) {
        if (644..=649).contains(&p3) {
            return "discover";
        }
    }
    if clean.starts_with('4') {
        return "visa";
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let vault = PanVault::from_encoded_key(&PanVault::generate_key()).unwrap();
        let blob = vault.encrypt("5413 3300 8901 0434").unwrap();
        assert_eq!(vault.decrypt(&blob).unwrap(), "5413330089010434");
    }

    #[test]
    fn test_blob_does_not_leak_pan() {
        let vault = PanVault::from_encoded_key(&PanVault::generate_key()).unwrap();
        let blob = vault.encrypt("5413330089010434").unwrap();
        assert!(!blob.contains("5413330089010434"));
        assert!(!blob.contains("0434"));
    }

    #[test]
    fn test_nonces_differ_per_encryption() {
        let vault = PanVault::from_encoded_key(&PanVault::generate_key()).unwrap();
        let a = vault.encrypt("5413330089010434").unwrap();
        let b = vault.encrypt("5413330089010434").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails_decrypt() {
        let vault = PanVault::from_encoded_key(&PanVault::generate_key()).unwrap();
        let other = PanVault::from_encoded_key(&PanVault::generate_key()).unwrap();
        let blob = vault.encrypt("5413330089010434").unwrap();
        assert!(matches!(other.decrypt(&blob), Err(VaultError::Decrypt(_))));
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(PanVault::from_encoded_key("dG9vLXNob3J0").is_err());
        assert!(PanVault::from_encoded_key("!!!").is_err());
    }

    #[test]
    fn test_last_four() {
        assert_eq!(last_four("5413-3300-8901-0434"), "0434");
        assert_eq!(last_four("5413330089015678"), "5678");
    }

    #[test]
    fn test_network_detection() {
        assert_eq!(detect_network("5413330089010434"), "mastercard");
        assert_eq!(detect_network("2221000000000000"), "mastercard");
        assert_eq!(detect_network("4111111111111111"), "visa");
        assert_eq!(detect_network("340000000000009"), "amex");
        assert_eq!(detect_network("6011000000000004"), "discover");
        assert_eq!(detect_network("6500000000000002"), "discover");
        assert_eq!(detect_network("9999000000000000"), "unknown");
    }
}
