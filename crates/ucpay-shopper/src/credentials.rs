//! Credentials provider: users, device credentials, payment instruments.
//!
//! Enrollment is challenge-response against the device authenticator;
//! mandate confirmation verifies a fresh device assertion locally before
//! the authorization leaves this service. PANs live encrypted in the
//! vault and never appear in mandates or logs.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use ucpay_core::canonical;
use ucpay_core::encoding;
use ucpay_core::mandate::PaymentMandateContents;
use uuid::Uuid;

use crate::device::{assertion_message, SoftwareAuthenticator};
use crate::tokenization::TokenizedCard;
use crate::vault::{detect_network, last_four, PanVault, VaultError};

/// Fixed demo PAN materialized at registration. A test fixture, not a
/// contract.
pub const DEMO_PAN: &str = "5413330089010434";

/// Demo card expiry month.
pub const DEMO_EXPIRY_MONTH: u32 = 12;

/// Demo card expiry year.
pub const DEMO_EXPIRY_YEAR: i32 = 2028;

/// Errors from the credentials provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The email is already registered.
    #[error("user already registered: {0}")]
    AlreadyRegistered(String),

    /// No user with that email.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The user has no usable payment instrument.
    #[error("no payment instrument on file for {0}")]
    NoInstrument(String),

    /// The email is not well-formed.
    #[error("malformed email: {0}")]
    MalformedEmail(String),

    /// The device attestation or assertion did not verify.
    #[error("device verification failed: {0}")]
    DeviceVerification(String),

    /// The device reported a non-monotonic signature counter.
    #[error("credential counter regressed")]
    CounterRegression,

    /// PAN vault failure.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Canonicalization failure while preparing a digest.
    #[error("canonicalization failed: {0}")]
    Canonical(#[from] serde_json::Error),
}

/// A device-bound credential on file.
#[derive(Debug, Clone)]
pub struct DeviceCredential {
    /// Opaque credential id, URL-safe base64.
    pub credential_id: String,
    /// Verification key for assertions.
    pub verifying_key: VerifyingKey,
    /// Last seen signature counter.
    pub counter: u32,
    /// Enrollment time.
    pub created_at: DateTime<Utc>,
}

/// A card on file. The PAN is present only encrypted.
#[derive(Debug, Clone)]
pub struct PaymentInstrument {
    /// Opaque instrument id.
    pub id: String,
    /// Encrypted PAN blob.
    pub encrypted_pan: String,
    /// Last four PAN digits.
    pub last_four: String,
    /// Card network.
    pub network: String,
    /// Cardholder display name.
    pub cardholder_name: String,
    /// Expiry month (1-12).
    pub expiry_month: u32,
    /// Expiry year (four digits).
    pub expiry_year: i32,
    /// Whether this is the user's default instrument.
    pub is_default: bool,
    /// Network-issued token, when tokenized.
    pub network_token: Option<String>,
    /// Network token reference, when tokenized.
    pub token_reference: Option<String>,
    /// Token assurance level, when tokenized.
    pub token_assurance_level: Option<String>,
    /// Tokenization time, RFC 3339, when tokenized.
    pub tokenized_at: Option<String>,
    /// Whether a network token is bound to this instrument.
    pub is_tokenized: bool,
}

/// Safe display view of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardView {
    /// Instrument id.
    pub instrument_id: String,
    /// Last four PAN digits.
    pub card_last_four: String,
    /// Card network.
    pub card_network: String,
    /// Cardholder display name.
    pub card_holder_name: String,
    /// Whether a network token is bound.
    pub is_tokenized: bool,
}

impl PaymentInstrument {
    /// The safe display view.
    #[must_use]
    pub fn view(&self) -> CardView {
        CardView {
            instrument_id: self.id.clone(),
            card_last_four: self.last_four.clone(),
            card_network: self.network.clone(),
            card_holder_name: self.cardholder_name.clone(),
            is_tokenized: self.is_tokenized,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone)]
pub struct User {
    /// Case-folded email, the identity.
    pub email: String,
    /// Display name.
    pub display_name: String,
    /// Registered device credentials.
    pub credentials: Vec<DeviceCredential>,
    /// Cards on file.
    pub instruments: Vec<PaymentInstrument>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// What enrollment hands back to the caller.
#[derive(Debug, Clone)]
pub struct Enrollment {
    /// The new credential id.
    pub credential_id: String,
    /// The credential public key, URL-safe base64, for registration with
    /// the merchant.
    pub public_key: String,
    /// The default instrument's display view.
    pub card: CardView,
}

/// In-memory credentials provider.
pub struct CredentialsProvider {
    users: RwLock<HashMap<String, User>>,
    vault: PanVault,
    /// Origin string bound into device assertions.
    origin: String,
}

impl CredentialsProvider {
    /// Creates a provider around a PAN vault.
    #[must_use]
    pub fn new(vault: PanVault, origin: impl Into<String>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            vault,
            origin: origin.into(),
        }
    }

    /// Registers a user: challenge-response credential enrollment plus a
    /// default instrument built from the demo PAN.
    ///
    /// # Errors
    ///
    /// Returns an error for a duplicate or malformed email, or when the
    /// device attestation does not verify.
    pub fn register(
        &self,
        email: &str,
        display_name: &str,
        device: &SoftwareAuthenticator,
    ) -> Result<Enrollment, ProviderError> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(ProviderError::MalformedEmail(email));
        }
        {
            let users = self.users.read().unwrap();
            if users.contains_key(&email) {
                return Err(ProviderError::AlreadyRegistered(email));
            }
        }

        // Challenge-response enrollment.
        let mut challenge = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut challenge);
        let attestation = device.enroll(&challenge);

        let verifying_key = decode_verifying_key(&attestation.public_key)?;
        let signature = decode_signature(&attestation.signature)?;
        verifying_key
            .verify(&challenge, &signature)
            .map_err(|_| ProviderError::DeviceVerification("attestation rejected".to_string()))?;

        let credential = DeviceCredential {
            credential_id: attestation.credential_id.clone(),
            verifying_key,
            counter: 0,
            created_at: Utc::now(),
        };

        let instrument = PaymentInstrument {
            id: format!("card_{}", &Uuid::new_v4().simple().to_string()[..12]),
            encrypted_pan: self.vault.encrypt(DEMO_PAN)?,
            last_four: last_four(DEMO_PAN),
            network: detect_network(DEMO_PAN).to_string(),
            cardholder_name: display_name.to_string(),
            expiry_month: DEMO_EXPIRY_MONTH,
            expiry_year: DEMO_EXPIRY_YEAR,
            is_default: true,
            network_token: None,
            token_reference: None,
            token_assurance_level: None,
            tokenized_at: None,
            is_tokenized: false,
        };
        let card = instrument.view();

        let user = User {
            email: email.clone(),
            display_name: display_name.to_string(),
            credentials: vec![credential],
            instruments: vec![instrument],
            created_at: Utc::now(),
        };

        let mut users = self.users.write().unwrap();
        users.insert(email.clone(), user);
        tracing::info!(email = %email, "user registered");

        Ok(Enrollment {
            credential_id: attestation.credential_id,
            public_key: attestation.public_key,
            card,
        })
    }

    /// Authorizes a mandate: issues a fresh challenge, has the device
    /// assert over `(challenge, origin, digest)`, verifies the assertion
    /// locally, and returns the authorization signature to attach.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown user, a failed local verification,
    /// or a regressed signature counter.
    pub fn authorize_mandate(
        &self,
        email: &str,
        contents: &PaymentMandateContents,
        device: &SoftwareAuthenticator,
    ) -> Result<String, ProviderError> {
        let email = email.trim().to_lowercase();
        let digest = canonical::digest(contents)?;

        let mut challenge = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut challenge);

        let (credential_id, verifying_key, last_counter) = {
            let users = self.users.read().unwrap();
            let user = users
                .get(&email)
                .ok_or_else(|| ProviderError::UnknownUser(email.clone()))?;
            let credential = user
                .credentials
                .first()
                .ok_or_else(|| ProviderError::DeviceVerification("no credential".to_string()))?;
            (
                credential.credential_id.clone(),
                credential.verifying_key,
                credential.counter,
            )
        };

        let assertion = device
            .sign_mandate(&credential_id, &challenge, &self.origin, &digest)
            .map_err(|e| ProviderError::DeviceVerification(e.to_string()))?;

        let message = assertion_message(&challenge, &self.origin, &digest);
        let signature = decode_signature(&assertion.assertion_signature)?;
        verifying_key
            .verify(&message, &signature)
            .map_err(|_| ProviderError::DeviceVerification("assertion rejected".to_string()))?;

        if assertion.counter <= last_counter {
            return Err(ProviderError::CounterRegression);
        }

        {
            let mut users = self.users.write().unwrap();
            if let Some(user) = users.get_mut(&email) {
                if let Some(credential) = user
                    .credentials
                    .iter_mut()
                    .find(|c| c.credential_id == credential_id)
                {
                    credential.counter = assertion.counter;
                }
            }
        }

        tracing::debug!(
            email = %email,
            mandate_id = %contents.payment_mandate_id,
            "mandate authorized by device credential"
        );
        Ok(assertion.authorization_signature)
    }

    /// The user's default payment instrument.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown user or a user with no instrument.
    pub fn default_instrument(&self, email: &str) -> Result<PaymentInstrument, ProviderError> {
        let email = email.trim().to_lowercase();
        let users = self.users.read().unwrap();
        let user = users
            .get(&email)
            .ok_or_else(|| ProviderError::UnknownUser(email.clone()))?;
        user.instruments
            .iter()
            .find(|i| i.is_default)
            .or_else(|| user.instruments.first())
            .cloned()
            .ok_or(ProviderError::NoInstrument(email))
    }

    /// Attaches a network token to an instrument.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown user.
    pub fn mark_tokenized(
        &self,
        email: &str,
        instrument_id: &str,
        tokenized: &TokenizedCard,
    ) -> Result<(), ProviderError> {
        let email = email.trim().to_lowercase();
        let mut users = self.users.write().unwrap();
        let user = users
            .get_mut(&email)
            .ok_or_else(|| ProviderError::UnknownUser(email.clone()))?;
        let instrument = user
            .instruments
            .iter_mut()
            .find(|i| i.id == instrument_id)
            .ok_or(ProviderError::NoInstrument(email))?;

        instrument.network_token = Some(tokenized.token.clone());
        instrument.token_reference = Some(tokenized.token_reference.clone());
        instrument.token_assurance_level = Some(tokenized.assurance_level.clone());
        instrument.tokenized_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
        instrument.is_tokenized = true;
        Ok(())
    }

    /// A snapshot of the user record.
    #[must_use]
    pub fn user(&self, email: &str) -> Option<User> {
        let users = self.users.read().unwrap();
        users.get(&email.trim().to_lowercase()).cloned()
    }

    /// Display views of the user's cards.
    #[must_use]
    pub fn cards(&self, email: &str) -> Vec<CardView> {
        self.user(email)
            .map(|u| u.instruments.iter().map(PaymentInstrument::view).collect())
            .unwrap_or_default()
    }

    /// Decrypts an instrument's PAN. Only tokenization enrollment needs
    /// this; nothing in the mandate path calls it.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault rejects the blob.
    pub fn reveal_pan(&self, instrument: &PaymentInstrument) -> Result<String, ProviderError> {
        Ok(self.vault.decrypt(&instrument.encrypted_pan)?)
    }
}

fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey, ProviderError> {
    let bytes = encoding::decode(encoded)
        .map_err(|e| ProviderError::DeviceVerification(e.to_string()))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ProviderError::DeviceVerification("bad key length".to_string()))?;
    VerifyingKey::from_bytes(&array)
        .map_err(|e| ProviderError::DeviceVerification(e.to_string()))
}

fn decode_signature(encoded: &str) -> Result<Signature, ProviderError> {
    let bytes = encoding::decode(encoded)
        .map_err(|e| ProviderError::DeviceVerification(e.to_string()))?;
    let array: [u8; 64] = bytes
        .try_into()
        .map_err(|_| ProviderError::DeviceVerification("bad signature length".to_string()))?;
    Ok(Signature::from_bytes(&array))
}

#[cfg(test)]
mod tests {
    use ucpay_core::amount::CurrencyAmount;
    use ucpay_core::mandate::{CardPaymentDetails, PaymentItem, PaymentResponse};

    use super::*;

    fn provider() -> CredentialsProvider {
        let vault = PanVault::from_encoded_key(&PanVault::generate_key()).unwrap();
        CredentialsProvider::new(vault, "http://localhost:8454")
    }

    fn contents() -> PaymentMandateContents {
        PaymentMandateContents {
            payment_mandate_id: "PM-1".into(),
            timestamp: "2026-08-02T10:00:00.000000Z".into(),
            payment_details_id: "REQ-1".into(),
            payment_details_total: PaymentItem {
                label: "Total".into(),
                amount: CurrencyAmount::new("SGD", 9.98),
            },
            payment_response: PaymentResponse {
                request_id: "REQ-1".into(),
                method_name: "CARD".into(),
                details: CardPaymentDetails {
                    token: "5342223122345000".into(),
                    cryptogram: "0123456789ABCDEF0123456789ABCDEF".into(),
                    card_last_four: "0434".into(),
                    card_network: "mastercard".into(),
                },
                payer_email: "a@example.com".into(),
                payer_name: "Alice Example".into(),
            },
            merchant_agent: "merchant-001".into(),
        }
    }

    #[test]
    fn test_register_creates_credential_and_default_card() {
        let provider = provider();
        let device = SoftwareAuthenticator::new();

        let enrollment = provider
            .register("A@Example.com", "Alice Example", &device)
            .unwrap();
        assert_eq!(enrollment.card.card_last_four, "0434");
        assert_eq!(enrollment.card.card_network, "mastercard");
        assert!(!enrollment.card.is_tokenized);

        let user = provider.user("a@example.com").unwrap();
        assert_eq!(user.credentials.len(), 1);
        assert_eq!(user.instruments.len(), 1);
        assert!(user.instruments[0].is_default);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let provider = provider();
        let device = SoftwareAuthenticator::new();
        provider.register("a@example.com", "Alice", &device).unwrap();
        assert!(matches!(
            provider.register("a@example.com", "Alice", &device),
            Err(ProviderError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_stored_pan_is_encrypted() {
        let provider = provider();
        let device = SoftwareAuthenticator::new();
        provider.register("a@example.com", "Alice", &device).unwrap();

        let instrument = provider.default_instrument("a@example.com").unwrap();
        assert!(!instrument.encrypted_pan.contains(DEMO_PAN));
        assert_eq!(provider.reveal_pan(&instrument).unwrap(), DEMO_PAN);
    }

    #[test]
    fn test_authorize_mandate_and_counter_advances() {
        let provider = provider();
        let device = SoftwareAuthenticator::new();
        provider.register("a@example.com", "Alice", &device).unwrap();

        let auth1 = provider
            .authorize_mandate("a@example.com", &contents(), &device)
            .unwrap();
        let auth2 = provider
            .authorize_mandate("a@example.com", &contents(), &device)
            .unwrap();
        // Same digest, same key: ed25519 is deterministic.
        assert_eq!(auth1, auth2);

        let user = provider.user("a@example.com").unwrap();
        assert_eq!(user.credentials[0].counter, 2);
    }

    #[test]
    fn test_authorization_verifies_against_merchant_side_check() {
        let provider = provider();
        let device = SoftwareAuthenticator::new();
        let enrollment = provider.register("a@example.com", "Alice", &device).unwrap();

        let contents = contents();
        let authorization = provider
            .authorize_mandate("a@example.com", &contents, &device)
            .unwrap();

        // Exactly the check the merchant agent performs.
        let key = decode_verifying_key(&enrollment.public_key).unwrap();
        let signature = decode_signature(&authorization).unwrap();
        let digest = canonical::digest(&contents).unwrap();
        key.verify(&digest, &signature).unwrap();
    }

    #[test]
    fn test_authorize_unknown_user() {
        let provider = provider();
        let device = SoftwareAuthenticator::new();
        assert!(matches!(
            provider.authorize_mandate("b@example.com", &contents(), &device),
            Err(ProviderError::UnknownUser(_))
        ));
    }

    #[test]
    fn test_mark_tokenized() {
        let provider = provider();
        let device = SoftwareAuthenticator::new();
        provider.register("a@example.com", "Alice", &device).unwrap();
        let instrument = provider.default_instrument("a@example.com").unwrap();

        provider
            .mark_tokenized(
                "a@example.com",
                &instrument.id,
                &TokenizedCard {
                    token: "5111222233334444".into(),
                    token_reference: "DWSPMC00000000001".into(),
                    assurance_level: "high".into(),
                },
            )
            .unwrap();

        let instrument = provider.default_instrument("a@example.com").unwrap();
        assert!(instrument.is_tokenized);
        assert_eq!(instrument.network_token.as_deref(), Some("5111222233334444"));
    }
}
