//! Network tokenization adapter.
//!
//! Two implementations behind one interface: a no-op pass-through used
//! when tokenization is disabled, and the OAuth1-signed HTTP client
//! against the card network's sandbox or production endpoints. The core
//! commit path never branches on which one is installed, and adapter
//! failures are never fatal: callers log and degrade to the local
//! token/cryptogram path.

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::oauth1::OAuth1Signer;

/// Sandbox API base URL.
pub const SANDBOX_BASE_URL: &str = "https://sandbox.api.mastercard.com";

/// Production API base URL.
pub const PRODUCTION_BASE_URL: &str = "https://api.mastercard.com";

/// Errors from the adapter. Callers treat every variant as degradable.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Tokenization is disabled.
    #[error("tokenization is disabled")]
    Disabled,

    /// Transport failure against the network.
    #[error("network transport error: {0}")]
    Transport(String),

    /// The network answered with something unusable.
    #[error("network protocol error: {0}")]
    Protocol(String),
}

/// A network token bound to an instrument.
#[derive(Debug, Clone)]
pub struct TokenizedCard {
    /// 16-digit network token.
    pub token: String,
    /// Network token reference.
    pub token_reference: String,
    /// Token assurance level reported by the network.
    pub assurance_level: String,
}

/// Outcome of the network's payment authentication step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Proceed without a challenge.
    NotRequired,
    /// The network demands user verification first.
    Required {
        /// Challenge id to verify against.
        challenge_id: String,
        /// Verification method, e.g. `otp`.
        method: String,
    },
    /// The network declined the transaction.
    Declined,
}

/// Interface over the network's tokenize / authenticate / verify calls.
///
/// Implementations block on I/O; async callers go through
/// `tokio::task::spawn_blocking`.
pub trait TokenizationAdapter: Send + Sync {
    /// Whether real network calls are configured.
    fn is_enabled(&self) -> bool;

    /// Tokenizes a PAN.
    ///
    /// # Errors
    ///
    /// Returns an error when disabled or when the network call fails.
    fn tokenize(
        &self,
        pan: &str,
        expiry_month: u32,
        expiry_year: i32,
    ) -> Result<TokenizedCard, AdapterError>;

    /// Asks the network whether this payment needs user verification.
    ///
    /// # Errors
    ///
    /// Returns an error when the network call fails.
    fn authenticate(
        &self,
        token: &str,
        amount: f64,
        currency: &str,
        merchant_id: &str,
        transaction_id: &str,
    ) -> Result<AuthOutcome, AdapterError>;

    /// Verifies a network challenge with the user's code.
    ///
    /// # Errors
    ///
    /// Returns an error when the network call fails.
    fn verify(&self, challenge_id: &str, code: &str) -> Result<bool, AdapterError>;
}

/// Pass-through used when tokenization is disabled.
#[derive(Default)]
pub struct NoopTokenization;

impl TokenizationAdapter for NoopTokenization {
    fn is_enabled(&self) -> bool {
        false
    }

    fn tokenize(&self, _: &str, _: u32, _: i32) -> Result<TokenizedCard, AdapterError> {
        Err(AdapterError::Disabled)
    }

    fn authenticate(
        &self,
        _: &str,
        _: f64,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<AuthOutcome, AdapterError> {
        Ok(AuthOutcome::NotRequired)
    }

    fn verify(&self, _: &str, _: &str) -> Result<bool, AdapterError> {
        Ok(false)
    }
}

/// OAuth1-signed client against the card network.
pub struct NetworkTokenization {
    signer: OAuth1Signer,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl NetworkTokenization {
    /// Creates a client for the sandbox or production environment.
    #[must_use]
    pub fn new(signer: OAuth1Signer, sandbox: bool) -> Self {
        let base_url = if sandbox {
            SANDBOX_BASE_URL
        } else {
            PRODUCTION_BASE_URL
        };
        Self::with_base_url(signer, base_url)
    }

    /// Creates a client against an explicit base URL.
    #[must_use]
    pub fn with_base_url(signer: OAuth1Signer, base_url: impl Into<String>) -> Self {
        Self {
            signer,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
        }
    }

    fn post_signed(&self, endpoint: &str, payload: &Value) -> Result<Value, AdapterError> {
        let url = format!("{}{endpoint}", self.base_url);
        let body = payload.to_string();
        let authorization = self.signer.authorization_header("POST", &url, Some(&body));

        let response = self
            .client
            .post(&url)
            .header("Authorization", authorization)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(AdapterError::Protocol(format!("{status}: {text}")));
        }
        response
            .json::<Value>()
            .map_err(|e| AdapterError::Protocol(e.to_string()))
    }
}

impl TokenizationAdapter for NetworkTokenization {
    fn is_enabled(&self) -> bool {
        true
    }

    fn tokenize(
        &self,
        pan: &str,
        expiry_month: u32,
        expiry_year: i32,
    ) -> Result<TokenizedCard, AdapterError> {
        let payload = json!({
            "requestId": Uuid::new_v4().to_string(),
            "taskId": Uuid::new_v4().to_string(),
            "tokenType": "CLOUD",
            "fundingAccountInfo": {
                "encryptedPayload": {
                    "accountNumber": pan,
                    "expiryMonth": format!("{expiry_month:02}"),
                    "expiryYear": expiry_year.to_string(),
                }
            }
        });

        let data = self.post_signed("/mdes/digitization/1/0/tokenize", &payload)?;

        let token = data
            .pointer("/token/value")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::Protocol("missing token.value".to_string()))?;
        let reference = data
            .get("tokenUniqueReference")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::Protocol("missing tokenUniqueReference".to_string()))?;
        let assurance = data
            .get("tokenAssuranceLevel")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        tracing::info!(token_reference = %reference, "card tokenized with network");
        Ok(TokenizedCard {
            token: token.to_string(),
            token_reference: reference.to_string(),
            assurance_level: assurance.to_string(),
        })
    }

    fn authenticate(
        &self,
        token: &str,
        amount: f64,
        currency: &str,
        merchant_id: &str,
        transaction_id: &str,
    ) -> Result<AuthOutcome, AdapterError> {
        let payload = json!({
            "requestId": Uuid::new_v4().to_string(),
            "transactionId": transaction_id,
            "tokenUniqueReference": token,
            "amount": {
                "value": ucpay_core::amount::to_minor_units(amount),
                "currency": currency,
            },
            "merchantId": merchant_id,
            "authenticationChannel": "WEB",
        });

        let data = self.post_signed("/scof/authentication/1/0/initiate", &payload)?;

        let status = data.get("status").and_then(Value::as_str).unwrap_or("");
        if status == "declined" {
            return Ok(AuthOutcome::Declined);
        }

        let required = data
            .get("authenticationRequired")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if required {
            let challenge_id = data
                .get("challengeId")
                .and_then(Value::as_str)
                .ok_or_else(|| AdapterError::Protocol("missing challengeId".to_string()))?;
            let method = data
                .get("authenticationMethod")
                .and_then(Value::as_str)
                .unwrap_or("otp");
            return Ok(AuthOutcome::Required {
                challenge_id: challenge_id.to_string(),
                method: method.to_string(),
            });
        }
        Ok(AuthOutcome::NotRequired)
    }

    fn verify(&self, challenge_id: &str, code: &str) -> Result<bool, AdapterError> {
        let payload = json!({
            "requestId": Uuid::new_v4().to_string(),
            "challengeId": challenge_id,
            "verificationCode": code,
        });

        let data = self.post_signed("/scof/authentication/1/0/verify", &payload)?;
        Ok(data.get("status").and_then(Value::as_str) == Some("approved"))
    }
}
