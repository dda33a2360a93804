//! Device-credential registration wire types.
//!
//! The shopper registers each user's device-bound public key with the
//! merchant at the end of enrollment; the merchant's AP2 agent verifies
//! mandate authorizations against the key on file.

use serde::{Deserialize, Serialize};

/// `POST /ap2/credentials/register` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterCredentialRequest {
    /// Email the credential is bound to.
    pub payer_email: String,
    /// Opaque credential id, URL-safe base64.
    pub credential_id: String,
    /// 32-byte ed25519 public key, URL-safe base64.
    pub public_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let request = RegisterCredentialRequest {
            payer_email: "a@example.com".into(),
            credential_id: "Y3JlZA".into(),
            public_key: "cGs".into(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let back: RegisterCredentialRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payer_email, request.payer_email);
        assert_eq!(back.credential_id, request.credential_id);
    }
}
