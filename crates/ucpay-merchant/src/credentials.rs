//! Registry of shopper device credentials.
//!
//! The shopper registers each user's device-bound public key here during
//! enrollment; the AP2 agent looks keys up by payer email when verifying a
//! mandate's user authorization. Latest registration for an email wins.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use thiserror::Error;
use ucpay_core::encoding;
pub use ucpay_core::enrollment::RegisterCredentialRequest;

/// Errors from credential registration.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The public key was not valid base64 or not 32 bytes.
    #[error("malformed public key: {0}")]
    MalformedKey(String),

    /// The email is not well-formed.
    #[error("malformed email: {0}")]
    MalformedEmail(String),
}

/// A registered device credential.
#[derive(Debug, Clone)]
pub struct RegisteredCredential {
    /// Opaque credential id.
    pub credential_id: String,
    /// Verification key for the device's assertions.
    pub verifying_key: VerifyingKey,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

/// In-memory credential registry keyed by case-folded email.
#[derive(Default)]
pub struct CredentialRegistry {
    inner: RwLock<HashMap<String, RegisteredCredential>>,
}

impl CredentialRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a credential for an email, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the email or key material is malformed.
    pub fn register(&self, request: &RegisterCredentialRequest) -> Result<(), CredentialError> {
        let email = request.payer_email.trim().to_lowercase();
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(CredentialError::MalformedEmail(request.payer_email.clone()));
        }

        let key_bytes = encoding::decode(&request.public_key)
            .map_err(|e| CredentialError::MalformedKey(e.to_string()))?;
        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| CredentialError::MalformedKey("expected 32 bytes".to_string()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_array)
            .map_err(|e| CredentialError::MalformedKey(e.to_string()))?;

        let mut inner = self.inner.write().unwrap();
        inner.insert(
            email,
            RegisteredCredential {
                credential_id: request.credential_id.clone(),
                verifying_key,
                registered_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Looks up the credential on file for an email.
    #[must_use]
    pub fn lookup(&self, payer_email: &str) -> Option<RegisteredCredential> {
        let inner = self.inner.read().unwrap();
        inner.get(&payer_email.trim().to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;

    fn request_for_key(email: &str, key: &SigningKey) -> RegisterCredentialRequest {
        RegisterCredentialRequest {
            payer_email: email.to_string(),
            credential_id: encoding::encode(b"cred-1"),
            public_key: encoding::encode(key.verifying_key().to_bytes()),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = CredentialRegistry::new();
        let key = SigningKey::generate(&mut rand::thread_rng());

        registry
            .register(&request_for_key("a@example.com", &key))
            .unwrap();

        let found = registry.lookup("a@example.com").unwrap();
        assert_eq!(
            found.verifying_key.to_bytes(),
            key.verifying_key().to_bytes()
        );
    }

    #[test]
    fn test_lookup_is_case_folded() {
        let registry = CredentialRegistry::new();
        let key = SigningKey::generate(&mut rand::thread_rng());

        registry
            .register(&request_for_key("A@Example.COM", &key))
            .unwrap();
        assert!(registry.lookup("a@example.com").is_some());
    }

    #[test]
    fn test_latest_registration_wins() {
        let registry = CredentialRegistry::new();
        let old = SigningKey::generate(&mut rand::thread_rng());
        let new = SigningKey::generate(&mut rand::thread_rng());

        registry
            .register(&request_for_key("a@example.com", &old))
            .unwrap();
        registry
            .register(&request_for_key("a@example.com", &new))
            .unwrap();

        let found = registry.lookup("a@example.com").unwrap();
        assert_eq!(
            found.verifying_key.to_bytes(),
            new.verifying_key().to_bytes()
        );
    }

    #[test]
    fn test_rejects_malformed_key() {
        let registry = CredentialRegistry::new();
        let request = RegisterCredentialRequest {
            payer_email: "a@example.com".to_string(),
            credential_id: "cred".to_string(),
            public_key: encoding::encode(b"too short"),
        };
        assert!(matches!(
            registry.register(&request),
            Err(CredentialError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_email() {
        let registry = CredentialRegistry::new();
        let key = SigningKey::generate(&mut rand::thread_rng());
        assert!(matches!(
            registry.register(&request_for_key("not-an-email", &key)),
            Err(CredentialError::MalformedEmail(_))
        ));
    }

    #[test]
    fn test_unknown_email() {
        let registry = CredentialRegistry::new();
        assert!(registry.lookup("nobody@example.com").is_none());
    }
}
