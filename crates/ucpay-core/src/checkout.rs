//! UCP checkout-session wire types.
//!
//! The merchant owns the session; these types are the JSON the two sides
//! exchange at `/ucp/v1/checkout-sessions`.

use serde::{Deserialize, Serialize};

use crate::mandate::PaymentMandate;
use crate::receipt::{OtpChallengeEnvelope, PaymentReceipt};

/// One line in a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Stock-keeping unit.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Quantity, must be positive.
    pub quantity: u32,
    /// Unit price in major units, must be non-negative.
    pub unit_price: f64,
}

/// Computed totals for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// Sum of `unit_price * quantity` over the line items.
    pub subtotal: f64,
    /// Tax per the merchant's policy; zero by default.
    pub tax: f64,
    /// `subtotal + tax`.
    pub total: f64,
    /// Session currency.
    pub currency: String,
}

/// Lifecycle states of a checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created; waiting for a payment mandate.
    Incomplete,
    /// Mandate attached; Complete may be called.
    ReadyForComplete,
    /// Risk policy demands a one-time code.
    RequiresEscalation,
    /// Terminal: payment captured.
    Complete,
    /// Terminal: the attempt failed.
    Failed,
}

impl SessionStatus {
    /// Whether the session can no longer transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// `POST /ucp/v1/checkout-sessions` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Cart lines; must be non-empty.
    pub line_items: Vec<LineItem>,
    /// Buyer's email.
    pub buyer_email: String,
    /// Three-letter currency code.
    pub currency: String,
}

/// `PUT /ucp/v1/checkout-sessions/{id}` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSessionRequest {
    /// The mandate to attach, verbatim.
    pub payment_mandate: PaymentMandate,
    /// User authorization, URL-safe base64. Falls back to the mandate's
    /// own `user_authorization` field when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_authorization: Option<String>,
}

/// AP2 summary block on a session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ap2Summary {
    /// Id of the attached mandate.
    pub mandate_id: String,
    /// The authorization blob attached with it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_authorization: Option<String>,
}

/// Session snapshot returned by every checkout endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSessionView {
    /// Opaque session id, `cs_` prefixed.
    pub id: String,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Cart lines.
    pub line_items: Vec<LineItem>,
    /// Buyer's email.
    pub buyer_email: String,
    /// Computed totals.
    pub totals: Totals,
    /// AP2 summary once a mandate is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ap2: Option<Ap2Summary>,
    /// The receipt once a terminal decision exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PaymentReceipt>,
    /// Creation time, RFC 3339.
    pub created_at: String,
    /// Last transition time, RFC 3339.
    pub updated_at: String,
}

/// Overall outcome of a Complete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompleteStatus {
    /// Payment captured; the receipt is final.
    Success,
    /// A one-time code is required (or the submitted one was wrong with
    /// attempts remaining).
    OtpRequired,
    /// The attempt failed terminally.
    Failed,
}

/// `POST /ucp/v1/checkout-sessions/{id}/complete` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteResponse {
    /// Overall outcome.
    pub status: CompleteStatus,
    /// Session snapshot after the call.
    pub session: CheckoutSessionView,
    /// The receipt for this decision.
    pub receipt: PaymentReceipt,
    /// Challenge envelope when `status` is `otp_required`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_challenge: Option<OtpChallengeEnvelope>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(SessionStatus::ReadyForComplete).unwrap(),
            "ready_for_complete"
        );
        assert_eq!(
            serde_json::to_value(SessionStatus::RequiresEscalation).unwrap(),
            "requires_escalation"
        );
        assert_eq!(
            serde_json::to_value(CompleteStatus::OtpRequired).unwrap(),
            "otp_required"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionStatus::Complete.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Incomplete.is_terminal());
        assert!(!SessionStatus::ReadyForComplete.is_terminal());
        assert!(!SessionStatus::RequiresEscalation.is_terminal());
    }
}
