//! Software device authenticator.
//!
//! Stands in for the user's platform authenticator: holds device-bound
//! ed25519 keys, answers enrollment challenges with an attestation, and
//! produces mandate assertions with a monotonically increasing signature
//! counter.
//!
//! A mandate signing produces two signatures: the assertion over
//! `(challenge, origin, digest)` that the credentials provider verifies
//! locally, and the authorization over the digest alone that travels to
//! the merchant inside the mandate.

use std::collections::HashMap;
use std::sync::Mutex;

use ed25519_dalek::{Signer as _, SigningKey};
use rand::RngCore;
use thiserror::Error;
use ucpay_core::encoding;

/// Errors from the authenticator.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No key material for the given credential id.
    #[error("unknown credential: {0}")]
    UnknownCredential(String),
}

/// Attestation returned for an enrollment challenge.
#[derive(Debug, Clone)]
pub struct Attestation {
    /// Fresh opaque credential id, URL-safe base64.
    pub credential_id: String,
    /// Public key of the new credential, URL-safe base64.
    pub public_key: String,
    /// Signature over the enrollment challenge, URL-safe base64.
    pub signature: String,
}

/// Signatures produced for one mandate confirmation.
#[derive(Debug, Clone)]
pub struct MandateAssertion {
    /// The credential that signed.
    pub credential_id: String,
    /// Signature counter after this assertion.
    pub counter: u32,
    /// Signature over `challenge || origin || digest`, URL-safe base64.
    pub assertion_signature: String,
    /// Signature over the mandate digest, URL-safe base64. This is the
    /// `user_authorization` value.
    pub authorization_signature: String,
}

struct DeviceKey {
    signing_key: SigningKey,
    counter: u32,
}

/// In-memory software authenticator.
#[derive(Default)]
pub struct SoftwareAuthenticator {
    keys: Mutex<HashMap<String, DeviceKey>>,
}

impl SoftwareAuthenticator {
    /// Creates an authenticator with no credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a credential and attests the enrollment challenge.
    pub fn enroll(&self, challenge: &[u8]) -> Attestation {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);

        let mut id_bytes = [0u8; 16];
        rng.fill_bytes(&mut id_bytes);
        let credential_id = encoding::encode(id_bytes);

        let attestation = Attestation {
            credential_id: credential_id.clone(),
            public_key: encoding::encode(signing_key.verifying_key().to_bytes()),
            signature: encoding::encode(signing_key.sign(challenge).to_bytes()),
        };

        let mut keys = self.keys.lock().unwrap();
        keys.insert(
            credential_id,
            DeviceKey {
                signing_key,
                counter: 0,
            },
        );
        attestation
    }

    /// Signs a mandate digest, bumping the credential's counter.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown credential id.
    pub fn sign_mandate(
        &self,
        credential_id: &str,
        challenge: &[u8],
        origin: &str,
        digest: &[u8; 32],
    ) -> Result<MandateAssertion, DeviceError> {
        let mut keys = self.keys.lock().unwrap();
        let key = keys
            .get_mut(credential_id)
            .ok_or_else(|| DeviceError::UnknownCredential(credential_id.to_string()))?;

        key.counter += 1;

        let message = assertion_message(challenge, origin, digest);

        Ok(MandateAssertion {
            credential_id: credential_id.to_string(),
            counter: key.counter,
            assertion_signature: encoding::encode(key.signing_key.sign(&message).to_bytes()),
            authorization_signature: encoding::encode(key.signing_key.sign(digest).to_bytes()),
        })
    }
}

/// Builds the message bytes an assertion signs over. The provider uses
/// the same layout when verifying.
#[must_use]
pub fn assertion_message(challenge: &[u8], origin: &str, digest: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(challenge.len() + origin.len() + digest.len());
    message.extend_from_slice(challenge);
    message.extend_from_slice(origin.as_bytes());
    message.extend_from_slice(digest);
    message
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    use super::*;

    fn verifying_key(encoded: &str) -> VerifyingKey {
        let bytes: [u8; 32] = encoding::decode(encoded).unwrap().try_into().unwrap();
        VerifyingKey::from_bytes(&bytes).unwrap()
    }

    fn signature(encoded: &str) -> Signature {
        let bytes: [u8; 64] = encoding::decode(encoded).unwrap().try_into().unwrap();
        Signature::from_bytes(&bytes)
    }

    #[test]
    fn test_enrollment_attestation_verifies() {
        let device = SoftwareAuthenticator::new();
        let challenge = [7u8; 32];
        let attestation = device.enroll(&challenge);

        let key = verifying_key(&attestation.public_key);
        key.verify(&challenge, &signature(&attestation.signature))
            .unwrap();
    }

    #[test]
    fn test_mandate_assertion_verifies_and_counts() {
        let device = SoftwareAuthenticator::new();
        let attestation = device.enroll(&[1u8; 32]);
        let key = verifying_key(&attestation.public_key);

        let challenge = [2u8; 32];
        let digest = [3u8; 32];
        let assertion = device
            .sign_mandate(&attestation.credential_id, &challenge, "http://localhost", &digest)
            .unwrap();
        assert_eq!(assertion.counter, 1);

        let message = assertion_message(&challenge, "http://localhost", &digest);
        key.verify(&message, &signature(&assertion.assertion_signature))
            .unwrap();
        key.verify(&digest, &signature(&assertion.authorization_signature))
            .unwrap();

        let again = device
            .sign_mandate(&attestation.credential_id, &challenge, "http://localhost", &digest)
            .unwrap();
        assert_eq!(again.counter, 2);
    }

    #[test]
    fn test_unknown_credential() {
        let device = SoftwareAuthenticator::new();
        let result = device.sign_mandate("bm9wZQ", &[0u8; 32], "origin", &[0u8; 32]);
        assert!(matches!(result, Err(DeviceError::UnknownCredential(_))));
    }
}
