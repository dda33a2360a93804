//! AP2 consumer agent: mandate assembly.
//!
//! Builds the `payment_mandate_contents` the device will sign: fresh
//! mandate and request ids, a current timestamp, and per-transaction
//! token and cryptogram. When the instrument carries a network token,
//! that token is used in place of the locally generated one; the
//! cryptogram is always generated locally.

use chrono::{SecondsFormat, Utc};
use ucpay_core::amount::CurrencyAmount;
use ucpay_core::mandate::{
    CardPaymentDetails, PaymentItem, PaymentMandateContents, PaymentResponse,
};
use ucpay_core::token;

use crate::credentials::PaymentInstrument;

/// Consumer-side AP2 agent.
#[derive(Default)]
pub struct ConsumerAgent;

impl ConsumerAgent {
    /// Creates an agent.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Assembles unsigned mandate contents for a checkout total.
    #[must_use]
    pub fn assemble(
        &self,
        total: &CurrencyAmount,
        instrument: &PaymentInstrument,
        payer_email: &str,
        payer_name: &str,
        merchant_agent: &str,
    ) -> PaymentMandateContents {
        let request_id = token::generate_request_id();
        let pay_token = instrument
            .network_token
            .clone()
            .filter(|_| instrument.is_tokenized)
            .unwrap_or_else(token::generate_token);

        let contents = PaymentMandateContents {
            payment_mandate_id: token::generate_mandate_id(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            payment_details_id: request_id.clone(),
            payment_details_total: PaymentItem {
                label: "Total".to_string(),
                amount: total.clone(),
            },
            payment_response: PaymentResponse {
                request_id,
                method_name: "CARD".to_string(),
                details: CardPaymentDetails {
                    token: pay_token,
                    cryptogram: token::generate_cryptogram(),
                    card_last_four: instrument.last_four.clone(),
                    card_network: instrument.network.clone(),
                },
                payer_email: payer_email.to_string(),
                payer_name: payer_name.to_string(),
            },
            merchant_agent: merchant_agent.to_string(),
        };

        tracing::info!(
            mandate_id = %contents.payment_mandate_id,
            merchant_agent = %merchant_agent,
            tokenized = instrument.is_tokenized,
            "payment mandate assembled"
        );
        contents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(tokenized: bool) -> PaymentInstrument {
        PaymentInstrument {
            id: "card_1".into(),
            encrypted_pan: "blob".into(),
            last_four: "0434".into(),
            network: "mastercard".into(),
            cardholder_name: "Alice Example".into(),
            expiry_month: 12,
            expiry_year: 2028,
            is_default: true,
            network_token: tokenized.then(|| "5111222233334444".to_string()),
            token_reference: tokenized.then(|| "DWSPMC0001".to_string()),
            token_assurance_level: tokenized.then(|| "high".to_string()),
            tokenized_at: None,
            is_tokenized: tokenized,
        }
    }

    #[test]
    fn test_assembled_mandate_is_well_shaped() {
        let agent = ConsumerAgent::new();
        let contents = agent.assemble(
            &CurrencyAmount::new("SGD", 9.98),
            &instrument(false),
            "a@example.com",
            "Alice Example",
            "merchant-001",
        );

        contents.validate_shape().unwrap();
        assert!(contents.payment_mandate_id.starts_with("PM-"));
        assert_eq!(contents.payment_details_total.amount.value, 9.98);
        assert_eq!(contents.payment_response.payer_email, "a@example.com");
        assert_eq!(contents.merchant_agent, "merchant-001");
        assert_eq!(
            contents.payment_details_id,
            contents.payment_response.request_id
        );
    }

    #[test]
    fn test_fresh_token_and_cryptogram_per_mandate() {
        let agent = ConsumerAgent::new();
        let total = CurrencyAmount::new("SGD", 9.98);
        let a = agent.assemble(&total, &instrument(false), "a@example.com", "Alice", "m");
        let b = agent.assemble(&total, &instrument(false), "a@example.com", "Alice", "m");

        assert_ne!(a.payment_mandate_id, b.payment_mandate_id);
        assert_ne!(
            a.payment_response.details.token,
            b.payment_response.details.token
        );
        assert_ne!(
            a.payment_response.details.cryptogram,
            b.payment_response.details.cryptogram
        );
    }

    #[test]
    fn test_tokenized_instrument_uses_network_token() {
        let agent = ConsumerAgent::new();
        let contents = agent.assemble(
            &CurrencyAmount::new("SGD", 9.98),
            &instrument(true),
            "a@example.com",
            "Alice",
            "m",
        );
        assert_eq!(
            contents.payment_response.details.token,
            "5111222233334444"
        );
        // Cryptogram is still generated locally.
        assert_eq!(contents.payment_response.details.cryptogram.len(), 32);
    }

    #[test]
    fn test_no_pan_in_mandate() {
        let agent = ConsumerAgent::new();
        let contents = agent.assemble(
            &CurrencyAmount::new("SGD", 9.98),
            &instrument(false),
            "a@example.com",
            "Alice",
            "m",
        );
        let json = serde_json::to_string(&contents).unwrap();
        assert!(!json.contains(crate::credentials::DEMO_PAN));
    }
}
