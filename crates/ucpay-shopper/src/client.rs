//! UCP merchant client.
//!
//! Wraps the merchant's discovery, product search, checkout session, and
//! AP2 credential endpoints. The discovery document is fetched once and
//! cached. Every call carries a 30 second deadline; a timeout surfaces as
//! a transport error the orchestrator treats as indeterminate.

use std::sync::RwLock;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use ucpay_core::checkout::{
    CheckoutSessionView, CompleteResponse, CreateSessionRequest, LineItem, UpdateSessionRequest,
};
use ucpay_core::discovery::DiscoveryDocument;
use ucpay_core::enrollment::RegisterCredentialRequest;
use ucpay_core::error::ApiError;
use ucpay_core::mandate::PaymentMandate;

/// Default deadline for calls to the merchant.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors from the merchant client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure, including timeouts.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The merchant answered with a protocol error body.
    #[error("merchant error ({status}): {error}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Parsed error body.
        error: ApiError,
    },

    /// The merchant answered with something unparseable.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Whether this failure leaves the outcome unknown (deadline hit).
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// The merchant's error body, when one was parsed.
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Client for one merchant's UCP surface.
pub struct MerchantClient {
    base_url: String,
    http: reqwest::Client,
    discovery: RwLock<Option<DiscoveryDocument>>,
}

impl MerchantClient {
    /// Creates a client for the merchant at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            discovery: RwLock::new(None),
        }
    }

    /// Fetches (and caches) the merchant's discovery document.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery is unreachable or the merchant does
    /// not advertise AP2 checkout.
    pub async fn discover(&self) -> Result<DiscoveryDocument, ClientError> {
        if let Some(cached) = self.discovery.read().unwrap().clone() {
            return Ok(cached);
        }

        let url = format!("{}/.well-known/ucp", self.base_url);
        let response = self.http.get(&url).send().await?;
        let document: DiscoveryDocument = handle(response).await?;

        if !document.supports_ap2_checkout() {
            return Err(ClientError::Protocol(
                "merchant does not advertise AP2 checkout".to_string(),
            ));
        }

        tracing::info!(
            merchant_id = %document.merchant.id,
            endpoint = ?document.shopping_endpoint(),
            "merchant discovered"
        );
        *self.discovery.write().unwrap() = Some(document.clone());
        Ok(document)
    }

    /// The merchant agent id from discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails.
    pub async fn merchant_agent_id(&self) -> Result<String, ClientError> {
        Ok(self.discover().await?.merchant.id)
    }

    /// Searches the merchant's products.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or protocol failure.
    pub async fn search_products(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/ucp/products/search", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("q", query), ("limit", &limit.to_string())])
            .send()
            .await?;
        handle(response).await
    }

    /// Opens a checkout session.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a merchant error body.
    pub async fn create_session(
        &self,
        line_items: Vec<LineItem>,
        buyer_email: &str,
        currency: &str,
    ) -> Result<CheckoutSessionView, ClientError> {
        let url = format!("{}/ucp/v1/checkout-sessions", self.base_url);
        let request = CreateSessionRequest {
            line_items,
            buyer_email: buyer_email.to_string(),
            currency: currency.to_string(),
        };
        let response = self.http.post(&url).json(&request).send().await?;
        handle(response).await
    }

    /// Fetches a session snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a merchant error body.
    pub async fn get_session(&self, session_id: &str) -> Result<CheckoutSessionView, ClientError> {
        let url = format!("{}/ucp/v1/checkout-sessions/{session_id}", self.base_url);
        let response = self.http.get(&url).send().await?;
        handle(response).await
    }

    /// Attaches a signed mandate to a session.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a merchant error body.
    pub async fn update_session(
        &self,
        session_id: &str,
        mandate: PaymentMandate,
    ) -> Result<CheckoutSessionView, ClientError> {
        let url = format!("{}/ucp/v1/checkout-sessions/{session_id}", self.base_url);
        let request = UpdateSessionRequest {
            user_authorization: mandate.user_authorization.clone(),
            payment_mandate: mandate,
        };
        let response = self.http.put(&url).json(&request).send().await?;
        handle(response).await
    }

    /// Completes a session, optionally with a one-time code.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a merchant error body.
    pub async fn complete_session(
        &self,
        session_id: &str,
        otp_code: Option<&str>,
    ) -> Result<CompleteResponse, ClientError> {
        let url = format!(
            "{}/ucp/v1/checkout-sessions/{session_id}/complete",
            self.base_url
        );
        let mut request = self.http.post(&url);
        if let Some(code) = otp_code {
            request = request.query(&[("otp_code", code)]);
        }
        let response = request.send().await?;
        handle(response).await
    }

    /// Registers a device credential with the merchant.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a merchant error body.
    pub async fn register_credential(
        &self,
        request: &RegisterCredentialRequest,
    ) -> Result<(), ClientError> {
        let url = format!("{}/ap2/credentials/register", self.base_url);
        let response = self.http.post(&url).json(request).send().await?;
        handle::<serde_json::Value>(response).await?;
        Ok(())
    }
}

async fn handle<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(error) => Err(ClientError::Api {
            status: status.as_u16(),
            error,
        }),
        Err(_) => Err(ClientError::Protocol(format!("{status}: {body}"))),
    }
}
