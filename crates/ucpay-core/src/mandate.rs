//! AP2 payment-mandate wire types and shape validation.
//!
//! A mandate is composed by the shopper, signed by the user's device
//! credential over the canonical encoding of its `contents`, and validated
//! by the merchant. The nested layout on the wire is fixed; see the module
//! docs in [`crate::canonical`] for the encoding the signature binds to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::CurrencyAmount;

/// Card networks the merchant accepts in `card_network`.
pub const KNOWN_NETWORKS: &[&str] = &["mastercard", "visa", "amex", "discover"];

/// A labeled payment line, as used for the mandate total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentItem {
    /// Display label, e.g. `Total`.
    pub label: String,
    /// The amount.
    pub amount: CurrencyAmount,
}

/// Card-method payment details carried inside the payment response.
///
/// Only tokenized values cross the shopper/merchant boundary: a
/// per-transaction 16-digit network token and 32-hex cryptogram plus the
/// displayable last-four and network. The PAN never appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardPaymentDetails {
    /// 16-digit numeric network token, freshly generated per mandate
    /// unless the instrument carries a network-issued token.
    pub token: String,
    /// 32-character uppercase hex cryptogram, per transaction.
    pub cryptogram: String,
    /// Last four PAN digits, for display.
    pub card_last_four: String,
    /// Card network, one of [`KNOWN_NETWORKS`].
    pub card_network: String,
}

/// The payment response block inside mandate contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResponse {
    /// Correlates with the payment details id.
    pub request_id: String,
    /// Payment method name; `CARD` for this demonstrator.
    pub method_name: String,
    /// Method-specific details.
    pub details: CardPaymentDetails,
    /// Payer's email; must equal the session's buyer email.
    pub payer_email: String,
    /// Payer's display name.
    pub payer_name: String,
}

/// The signed portion of a payment mandate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMandateContents {
    /// Shopper-generated, collision-resistant mandate id.
    pub payment_mandate_id: String,
    /// RFC 3339 timestamp at assembly time. Kept as a string so the
    /// canonical bytes the device signed survive a decode/encode
    /// round-trip on the merchant.
    pub timestamp: String,
    /// Id of the payment details this mandate settles.
    pub payment_details_id: String,
    /// The total the user authorized.
    pub payment_details_total: PaymentItem,
    /// Payment response with method details.
    pub payment_response: PaymentResponse,
    /// Merchant agent id obtained from discovery.
    pub merchant_agent: String,
}

/// A payment mandate: signed contents plus the user's authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMandate {
    /// The signed portion.
    pub payment_mandate_contents: PaymentMandateContents,
    /// Device signature over the canonical digest of the contents,
    /// URL-safe base64. Absent until the user has signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_authorization: Option<String>,
}

/// Shape violations detected by [`PaymentMandateContents::validate_shape`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MandateShapeError {
    /// The mandate id is empty.
    #[error("payment_mandate_id is empty")]
    EmptyMandateId,

    /// The token is not a 16-digit numeric.
    #[error("token must be 16 decimal digits")]
    BadToken,

    /// The cryptogram is not 32 uppercase hex characters.
    #[error("cryptogram must be 32 uppercase hex characters")]
    BadCryptogram,

    /// The last-four field is not 4 digits.
    #[error("card_last_four must be 4 digits")]
    BadLastFour,

    /// The card network is not recognized.
    #[error("unknown card network: {0}")]
    UnknownNetwork(String),
}

impl PaymentMandateContents {
    /// Validates the token, cryptogram, and card-field shapes.
    ///
    /// # Errors
    ///
    /// Returns the first shape violation found.
    pub fn validate_shape(&self) -> Result<(), MandateShapeError> {
        if self.payment_mandate_id.is_empty() {
            return Err(MandateShapeError::EmptyMandateId);
        }
        let details = &self.payment_response.details;
        if details.token.len() != 16 || !details.token.chars().all(|c| c.is_ascii_digit()) {
            return Err(MandateShapeError::BadToken);
        }
        if details.cryptogram.len() != 32
            || !details
                .cryptogram
                .chars()
                .all(|c| c.is_ascii_digit() || (c.is_ascii_uppercase() && c.is_ascii_hexdigit()))
        {
            return Err(MandateShapeError::BadCryptogram);
        }
        if details.card_last_four.len() != 4
            || !details.card_last_four.chars().all(|c| c.is_ascii_digit())
        {
            return Err(MandateShapeError::BadLastFour);
        }
        if !KNOWN_NETWORKS.contains(&details.card_network.as_str()) {
            return Err(MandateShapeError::UnknownNetwork(
                details.card_network.clone(),
            ));
        }
        Ok(())
    }
}
