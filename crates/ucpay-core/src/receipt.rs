//! AP2 payment receipts and the step-up challenge envelope.
//!
//! A receipt is the merchant's terminal statement about a payment attempt.
//! Every terminal decision produces one; the `OTP_REQUIRED` receipt is the
//! only non-terminal receipt and carries the challenge envelope the client
//! needs to retry Complete with a code.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::CurrencyAmount;

/// Outcome codes carried in a receipt's status block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptCode {
    /// Payment captured.
    Success,
    /// Risk policy demands a one-time code; retry Complete with it.
    OtpRequired,
    /// User authorization signature failed verification.
    InvalidAuthorization,
    /// Token/cryptogram/card-field shape violations.
    MalformedMandate,
    /// The step-up challenge expired.
    ChallengeExpired,
    /// The step-up challenge ran out of attempts.
    ChallengeExhausted,
    /// The submitted one-time code did not verify.
    InvalidOtp,
    /// The session expired before completion.
    SessionExpired,
}

impl ReceiptCode {
    /// Whether this code settles the payment attempt.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::OtpRequired | Self::InvalidOtp)
    }
}

/// Status block inside a receipt: code plus optional detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatus {
    /// Outcome code.
    pub code: ReceiptCode,
    /// Human-readable detail. For `OTP_REQUIRED` this begins with the
    /// literal prefix `OTP_REQUIRED:`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Challenge envelope attached to an `OTP_REQUIRED` receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpChallengeEnvelope {
    /// The mandate the challenge is bound to.
    pub payment_mandate_id: String,
    /// Display message for the user.
    pub message: String,
}

/// Method-specific detail block on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodDetails {
    /// Present on `OTP_REQUIRED` receipts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_challenge: Option<OtpChallengeEnvelope>,
}

/// The merchant's statement about a payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// The mandate this receipt settles.
    pub payment_mandate_id: String,
    /// Issuance time, RFC 3339.
    pub timestamp: String,
    /// Fresh payment id, `PAY-` prefixed on success, `ERR-` on failure.
    pub payment_id: String,
    /// The amount the decision covers.
    pub amount: CurrencyAmount,
    /// Outcome.
    pub payment_status: PaymentStatus,
    /// Merchant confirmation id, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_confirmation_id: Option<String>,
    /// Method-specific details (step-up envelope).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_details: Option<PaymentMethodDetails>,
    /// Optional merchant signature over the canonical receipt, URL-safe
    /// base64.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_signature: Option<String>,
}

/// Generates a fresh payment id in the merchant's `PAY-` format.
#[must_use]
pub fn new_payment_id() -> String {
    format!("PAY-{}", &Uuid::new_v4().simple().to_string().to_uppercase()[..12])
}

/// Generates a fresh error payment id in the merchant's `ERR-` format.
#[must_use]
pub fn new_error_payment_id() -> String {
    format!("ERR-{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// Generates a merchant confirmation id in the `MCH-` format.
#[must_use]
pub fn new_confirmation_id() -> String {
    format!("MCH-{}", &Uuid::new_v4().simple().to_string().to_uppercase()[..8])
}
