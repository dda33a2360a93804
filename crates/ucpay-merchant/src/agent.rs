//! AP2 merchant agent.
//!
//! Runs the adjudication pipeline on Complete: user-authorization
//! signature verification, mandate integrity, then the deterministic risk
//! draw that decides whether a step-up challenge is required. Also builds
//! every receipt the merchant issues.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use ed25519_dalek::{Signature, Verifier};
use ucpay_core::amount::CurrencyAmount;
use ucpay_core::canonical;
use ucpay_core::encoding;
use ucpay_core::mandate::PaymentMandate;
use ucpay_core::receipt::{
    new_confirmation_id, new_error_payment_id, new_payment_id, OtpChallengeEnvelope,
    PaymentMethodDetails, PaymentReceipt, PaymentStatus, ReceiptCode,
};
use ucpay_core::risk;

use crate::credentials::CredentialRegistry;
use crate::signer::ReceiptSigner;

/// Risk and identity configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Merchant id bound into the risk seed.
    pub merchant_id: String,
    /// Whether step-up challenges are enabled at all.
    pub step_up_enabled: bool,
    /// Totals at or above this amount use the large probability band.
    pub amount_threshold: f64,
    /// Step-up probability for totals below the amount threshold.
    pub threshold_small: f64,
    /// Step-up probability for totals at or above the amount threshold.
    pub threshold_large: f64,
}

/// The agent's decision for a `ready_for_complete` session.
#[derive(Debug)]
pub enum Adjudication {
    /// Capture the payment.
    Approve,
    /// Issue a step-up challenge first.
    StepUp,
    /// Reject terminally with the given receipt code.
    Reject {
        /// Receipt code for the failure.
        code: ReceiptCode,
        /// Human-readable detail.
        message: String,
    },
}

/// Merchant-side AP2 payment agent.
pub struct MerchantAgent {
    config: AgentConfig,
    credentials: Arc<CredentialRegistry>,
    signer: ReceiptSigner,
}

impl MerchantAgent {
    /// Creates an agent.
    #[must_use]
    pub fn new(
        config: AgentConfig,
        credentials: Arc<CredentialRegistry>,
        signer: ReceiptSigner,
    ) -> Self {
        Self {
            config,
            credentials,
            signer,
        }
    }

    /// The merchant id this agent signs risk decisions with.
    #[must_use]
    pub fn merchant_id(&self) -> &str {
        &self.config.merchant_id
    }

    /// Runs signature validation, integrity checks, and the risk draw.
    #[must_use]
    pub fn adjudicate(
        &self,
        session_total: &CurrencyAmount,
        mandate: &PaymentMandate,
        authorization: Option<&str>,
    ) -> Adjudication {
        let contents = &mandate.payment_mandate_contents;
        let mandate_id = &contents.payment_mandate_id;

        // 1. Signature validation.
        if let Err(message) = self.verify_authorization(mandate, authorization) {
            tracing::warn!(mandate_id = %mandate_id, %message, "authorization rejected");
            return Adjudication::Reject {
                code: ReceiptCode::InvalidAuthorization,
                message,
            };
        }

        // 2. Mandate integrity.
        if let Err(error) = contents.validate_shape() {
            tracing::warn!(mandate_id = %mandate_id, %error, "malformed mandate");
            return Adjudication::Reject {
                code: ReceiptCode::MalformedMandate,
                message: error.to_string(),
            };
        }
        if !contents.payment_details_total.amount.matches(session_total) {
            tracing::warn!(mandate_id = %mandate_id, "mandate total disagrees with session");
            return Adjudication::Reject {
                code: ReceiptCode::MalformedMandate,
                message: "mandate total does not match session total".to_string(),
            };
        }

        // 3. Risk adjudication: a deterministic draw so replays of the
        // same mandate reach the same decision.
        if self.config.step_up_enabled {
            let draw = risk::draw(mandate_id, &self.config.merchant_id);
            let band = if session_total.value < self.config.amount_threshold {
                self.config.threshold_small
            } else {
                self.config.threshold_large
            };
            if draw < band {
                tracing::info!(
                    mandate_id = %mandate_id,
                    draw,
                    band,
                    "risk draw demands step-up"
                );
                return Adjudication::StepUp;
            }
        }

        Adjudication::Approve
    }

    /// Verifies the user authorization against the device credential on
    /// file for the payer email, over the canonical digest of the mandate
    /// contents.
    fn verify_authorization(
        &self,
        mandate: &PaymentMandate,
        authorization: Option<&str>,
    ) -> Result<(), String> {
        let contents = &mandate.payment_mandate_contents;

        let authorization = authorization
            .or(mandate.user_authorization.as_deref())
            .ok_or_else(|| "missing user authorization".to_string())?;

        let credential = self
            .credentials
            .lookup(&contents.payment_response.payer_email)
            .ok_or_else(|| {
                format!(
                    "no device credential on file for {}",
                    contents.payment_response.payer_email
                )
            })?;

        let signature_bytes =
            encoding::decode(authorization).map_err(|e| format!("authorization: {e}"))?;
        let signature_array: [u8; 64] = signature_bytes
            .try_into()
            .map_err(|_| "authorization is not a 64-byte signature".to_string())?;
        let signature = Signature::from_bytes(&signature_array);

        let digest = canonical::digest(contents).map_err(|e| e.to_string())?;

        credential
            .verifying_key
            .verify(&digest, &signature)
            .map_err(|_| "signature verification failed".to_string())
    }

    /// Builds a `SUCCESS` receipt, signed when the signer is configured.
    pub async fn success_receipt(&self, mandate: &PaymentMandate) -> PaymentReceipt {
        let contents = &mandate.payment_mandate_contents;
        let payment_id = new_payment_id();
        tracing::info!(
            mandate_id = %contents.payment_mandate_id,
            payment_id = %payment_id,
            "payment captured"
        );

        let mut receipt = PaymentReceipt {
            payment_mandate_id: contents.payment_mandate_id.clone(),
            timestamp: now_rfc3339(),
            payment_id,
            amount: contents.payment_details_total.amount.clone(),
            payment_status: PaymentStatus {
                code: ReceiptCode::Success,
                error_message: None,
            },
            merchant_confirmation_id: Some(new_confirmation_id()),
            payment_method_details: None,
            merchant_signature: None,
        };
        receipt.merchant_signature = self.signer.sign(&receipt).await;
        receipt
    }

    /// Builds a terminal error receipt.
    #[must_use]
    pub fn error_receipt(
        &self,
        mandate: &PaymentMandate,
        code: ReceiptCode,
        message: impl Into<String>,
    ) -> PaymentReceipt {
        let contents = &mandate.payment_mandate_contents;
        PaymentReceipt {
            payment_mandate_id: contents.payment_mandate_id.clone(),
            timestamp: now_rfc3339(),
            payment_id: new_error_payment_id(),
            amount: contents.payment_details_total.amount.clone(),
            payment_status: PaymentStatus {
                code,
                error_message: Some(message.into()),
            },
            merchant_confirmation_id: None,
            payment_method_details: None,
            merchant_signature: None,
        }
    }

    /// Builds an `OTP_REQUIRED` receipt with the challenge envelope.
    #[must_use]
    pub fn otp_receipt(&self, mandate: &PaymentMandate) -> (PaymentReceipt, OtpChallengeEnvelope) {
        let contents = &mandate.payment_mandate_contents;
        let envelope = OtpChallengeEnvelope {
            payment_mandate_id: contents.payment_mandate_id.clone(),
            message: format!(
                "OTP verification required. Code sent to {}",
                contents.payment_response.payer_email
            ),
        };
        let receipt = PaymentReceipt {
            payment_mandate_id: contents.payment_mandate_id.clone(),
            timestamp: now_rfc3339(),
            payment_id: "PENDING-OTP".to_string(),
            amount: contents.payment_details_total.amount.clone(),
            payment_status: PaymentStatus {
                code: ReceiptCode::OtpRequired,
                error_message: Some(format!("OTP_REQUIRED:{}", envelope.message)),
            },
            merchant_confirmation_id: None,
            payment_method_details: Some(PaymentMethodDetails {
                otp_challenge: Some(envelope.clone()),
            }),
            merchant_signature: None,
        };
        (receipt, envelope)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
