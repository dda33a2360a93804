//! The merchant-owned checkout session record.

use chrono::{DateTime, SecondsFormat, Utc};
use ucpay_core::checkout::{Ap2Summary, CheckoutSessionView, LineItem, SessionStatus, Totals};
use ucpay_core::mandate::PaymentMandate;
use ucpay_core::receipt::PaymentReceipt;
use uuid::Uuid;

/// How long a session may sit in `ready_for_complete` or
/// `requires_escalation` before it expires.
pub const SESSION_INACTIVITY_SECS: i64 = 300;

/// A checkout session as the merchant stores it.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Opaque id, `cs_` prefixed.
    pub id: String,
    /// Cart lines.
    pub line_items: Vec<LineItem>,
    /// Buyer email, case-folded at creation.
    pub buyer_email: String,
    /// Computed totals.
    pub totals: Totals,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// The attached mandate, verbatim as received.
    pub mandate: Option<PaymentMandate>,
    /// The user authorization attached with the mandate.
    pub user_authorization: Option<String>,
    /// The receipt for the terminal decision.
    pub receipt: Option<PaymentReceipt>,
    /// Active step-up challenge id, if any.
    pub challenge_id: Option<String>,
    /// Store version counter for compare-and-swap.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Creates a fresh `incomplete` session.
    #[must_use]
    pub fn new(line_items: Vec<LineItem>, buyer_email: String, totals: Totals) -> Self {
        let now = Utc::now();
        Self {
            id: format!("cs_{}", &Uuid::new_v4().simple().to_string()[..16]),
            line_items,
            buyer_email,
            totals,
            status: SessionStatus::Incomplete,
            mandate: None,
            user_authorization: None,
            receipt: None,
            challenge_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Id of the attached mandate, if any.
    #[must_use]
    pub fn mandate_id(&self) -> Option<&str> {
        self.mandate
            .as_ref()
            .map(|m| m.payment_mandate_contents.payment_mandate_id.as_str())
    }

    /// Whether the session has outlived its inactivity window while
    /// awaiting completion.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            SessionStatus::ReadyForComplete | SessionStatus::RequiresEscalation
        ) && (now - self.updated_at).num_seconds() > SESSION_INACTIVITY_SECS
    }

    /// The wire snapshot of this session.
    #[must_use]
    pub fn view(&self) -> CheckoutSessionView {
        CheckoutSessionView {
            id: self.id.clone(),
            status: self.status,
            line_items: self.line_items.clone(),
            buyer_email: self.buyer_email.clone(),
            totals: self.totals.clone(),
            ap2: self.mandate.as_ref().map(|m| Ap2Summary {
                mandate_id: m.payment_mandate_contents.payment_mandate_id.clone(),
                user_authorization: self.user_authorization.clone(),
            }),
            receipt: self.receipt.clone(),
            created_at: self
                .created_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            updated_at: self
                .updated_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}
