//! Optional receipt signing via the external DID signing service.
//!
//! Receipt issuance is the single commit point of a payment; the signer is
//! strictly additive. Any transport or protocol failure here degrades to
//! an unsigned receipt and never blocks or fails the commit.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use ucpay_core::canonical;
use ucpay_core::receipt::PaymentReceipt;

/// Client for the DID signing endpoint.
pub struct ReceiptSigner {
    endpoint: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

impl ReceiptSigner {
    /// Creates a signer; `None` disables signing entirely.
    #[must_use]
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// A signer that never signs.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Requests a signature over the canonical receipt encoding.
    ///
    /// Returns `None` when signing is disabled or the signer is
    /// unreachable; the caller attaches the signature only when present.
    pub async fn sign(&self, receipt: &PaymentReceipt) -> Option<String> {
        let endpoint = self.endpoint.as_deref()?;

        let payload = match canonical::to_canonical_string(receipt) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "could not canonicalize receipt for signing");
                return None;
            }
        };

        let url = format!("{}/sign", endpoint.trim_end_matches('/'));
        let body = json!({
            "payload": ucpay_core::encoding::encode(payload.as_bytes()),
        });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, %url, "receipt signer unreachable, issuing unsigned");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                status = %response.status(),
                %url,
                "receipt signer rejected request, issuing unsigned"
            );
            return None;
        }

        match response.json::<SignResponse>().await {
            Ok(signed) => Some(signed.signature),
            Err(error) => {
                tracing::warn!(%error, "malformed signer response, issuing unsigned");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ucpay_core::amount::CurrencyAmount;
    use ucpay_core::receipt::{new_payment_id, PaymentStatus, ReceiptCode};

    use super::*;

    fn receipt() -> PaymentReceipt {
        PaymentReceipt {
            payment_mandate_id: "PM-1".into(),
            timestamp: "2026-08-02T10:00:00Z".into(),
            payment_id: new_payment_id(),
            amount: CurrencyAmount::new("SGD", 9.98),
            payment_status: PaymentStatus {
                code: ReceiptCode::Success,
                error_message: None,
            },
            merchant_confirmation_id: None,
            payment_method_details: None,
            merchant_signature: None,
        }
    }

    #[tokio::test]
    async fn test_disabled_signer_returns_none() {
        let signer = ReceiptSigner::disabled();
        assert!(signer.sign(&receipt()).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_signer_degrades() {
        // Nothing listens on this port; the failure must be swallowed.
        let signer = ReceiptSigner::new(Some("http://127.0.0.1:1".to_string()));
        assert!(signer.sign(&receipt()).await.is_none());
    }
}
