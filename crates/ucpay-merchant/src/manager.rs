//! Checkout session manager.
//!
//! Owns the session state machine. All transitions on a session are
//! serialized by a per-session lock acquired at entry; writes go through
//! the store's compare-and-swap so a replacement store keeps the same
//! discipline. Terminal sessions are immutable: repeated Complete returns
//! the cached receipt, repeated Update is rejected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use ucpay_core::amount::{is_valid_currency, round_half_even_2, CurrencyAmount};
use ucpay_core::checkout::{
    CheckoutSessionView, CompleteResponse, CompleteStatus, CreateSessionRequest, SessionStatus,
    Totals, UpdateSessionRequest,
};
use ucpay_core::error::{ApiError, ErrorKind};
use ucpay_core::mandate::PaymentMandate;
use ucpay_core::receipt::{OtpChallengeEnvelope, PaymentReceipt, ReceiptCode};

use crate::agent::{Adjudication, MerchantAgent};
use crate::catalog::Catalog;
use crate::challenge::{ChallengeStore, VerifyOutcome};
use crate::session::CheckoutSession;
use crate::store::SessionStore;

/// Tax policy: subtotal in, tax owed out. The default charges none.
pub type TaxPolicy = fn(f64) -> f64;

/// The default tax policy.
#[must_use]
pub fn zero_tax(_subtotal: f64) -> f64 {
    0.0
}

/// The checkout session manager.
pub struct CheckoutManager {
    store: Arc<dyn SessionStore>,
    agent: MerchantAgent,
    challenges: ChallengeStore,
    catalog: Option<Arc<Catalog>>,
    tax: TaxPolicy,
    /// mandate id -> owning session id; a mandate attaches to at most one
    /// session, ever.
    mandates: Mutex<HashMap<String, String>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CheckoutManager {
    /// Creates a manager. Passing a catalog enables the unknown-sku check
    /// at session creation.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        agent: MerchantAgent,
        challenges: ChallengeStore,
        catalog: Option<Arc<Catalog>>,
    ) -> Self {
        Self {
            store,
            agent,
            challenges,
            catalog,
            tax: zero_tax,
            mandates: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the tax policy.
    #[must_use]
    pub fn with_tax_policy(mut self, tax: TaxPolicy) -> Self {
        self.tax = tax;
        self
    }

    /// Creates a session in `incomplete` with computed totals.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_INPUT` for an empty cart, malformed line items,
    /// a malformed email or currency, or (when the catalog check is
    /// enabled) an unknown sku.
    pub fn create(&self, request: &CreateSessionRequest) -> Result<CheckoutSessionView, ApiError> {
        if request.line_items.is_empty() {
            return Err(ApiError::invalid_input("cart must contain at least one item"));
        }
        for item in &request.line_items {
            if item.quantity == 0 {
                return Err(ApiError::invalid_input(format!(
                    "line item {} has zero quantity",
                    item.sku
                )));
            }
            if !item.unit_price.is_finite() || item.unit_price < 0.0 {
                return Err(ApiError::invalid_input(format!(
                    "line item {} has a negative price",
                    item.sku
                )));
            }
            if let Some(catalog) = &self.catalog {
                if !catalog.contains(&item.sku) {
                    return Err(ApiError::invalid_input(format!("unknown sku: {}", item.sku)));
                }
            }
        }
        if !well_formed_email(&request.buyer_email) {
            return Err(ApiError::invalid_input("malformed buyer_email"));
        }
        if !is_valid_currency(&request.currency) {
            return Err(ApiError::invalid_input("currency must be a 3-letter code"));
        }

        let subtotal = round_half_even_2(
            request
                .line_items
                .iter()
                .map(|i| i.unit_price * f64::from(i.quantity))
                .sum(),
        );
        let tax = round_half_even_2((self.tax)(subtotal));
        let totals = Totals {
            subtotal,
            tax,
            total: round_half_even_2(subtotal + tax),
            currency: request.currency.clone(),
        };

        let session = CheckoutSession::new(
            request.line_items.clone(),
            request.buyer_email.trim().to_lowercase(),
            totals,
        );
        let view = session.view();
        self.store
            .create(session)
            .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))?;

        tracing::info!(
            session_id = %view.id,
            buyer_email = %view.buyer_email,
            total = view.totals.total,
            "checkout session created"
        );
        Ok(view)
    }

    /// Returns the current session snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` for an unknown id.
    pub fn get(&self, id: &str) -> Result<CheckoutSessionView, ApiError> {
        self.store
            .get(id)
            .map(|s| s.view())
            .ok_or_else(|| ApiError::not_found(format!("checkout session not found: {id}")))
    }

    /// Attaches a payment mandate, transitioning to `ready_for_complete`.
    ///
    /// Re-attaching a byte-identical mandate is a no-op; re-using a
    /// mandate id across sessions (or re-attaching the same id with
    /// different contents) is rejected.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND`, `INVALID_STATE`, `MALFORMED_MANDATE`,
    /// `MANDATE_SESSION_MISMATCH`, or `MANDATE_REUSE`.
    pub async fn update(
        &self,
        id: &str,
        request: UpdateSessionRequest,
    ) -> Result<CheckoutSessionView, ApiError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut session = self
            .store
            .get(id)
            .ok_or_else(|| ApiError::not_found(format!("checkout session not found: {id}")))?;

        if session.status.is_terminal() {
            return Err(ApiError::invalid_state(format!(
                "session is {:?} and immutable",
                session.status
            )));
        }

        let mandate = request.payment_mandate;
        let authorization = request
            .user_authorization
            .clone()
            .or_else(|| mandate.user_authorization.clone());
        let contents = &mandate.payment_mandate_contents;

        contents
            .validate_shape()
            .map_err(|e| ApiError::new(ErrorKind::MalformedMandate, e.to_string()))?;

        let session_total = CurrencyAmount::new(session.totals.currency.clone(), session.totals.total);
        if !contents.payment_details_total.amount.matches(&session_total) {
            return Err(ApiError::new(
                ErrorKind::MandateSessionMismatch,
                format!(
                    "mandate total {} {} does not match session total {} {}",
                    contents.payment_details_total.amount.currency,
                    contents.payment_details_total.amount.value,
                    session_total.currency,
                    session_total.value,
                ),
            ));
        }
        if contents.payment_response.payer_email.trim().to_lowercase() != session.buyer_email {
            return Err(ApiError::new(
                ErrorKind::MandateSessionMismatch,
                "mandate payer_email does not match session buyer_email",
            ));
        }

        let mandate_id = contents.payment_mandate_id.clone();
        {
            let mut registry = self.mandates.lock().unwrap();
            match registry.get(&mandate_id) {
                Some(owner) if owner != id => {
                    return Err(ApiError::new(
                        ErrorKind::MandateReuse,
                        format!("mandate {mandate_id} is attached to another session"),
                    ));
                }
                Some(_) => {
                    let identical = session
                        .mandate
                        .as_ref()
                        .is_some_and(|m| *m == mandate)
                        && session.user_authorization == authorization;
                    if identical {
                        // Idempotent re-attach.
                        return Ok(session.view());
                    }
                    return Err(ApiError::new(
                        ErrorKind::MandateReuse,
                        format!("mandate {mandate_id} was already attached with different contents"),
                    ));
                }
                None => {
                    registry.insert(mandate_id.clone(), id.to_string());
                }
            }
        }

        // Replacing a mandate invalidates any challenge bound to the old
        // one.
        if let Some(old_id) = session.mandate_id() {
            if old_id != mandate_id {
                self.challenges.cancel(old_id);
            }
        }

        let version = session.version;
        session.mandate = Some(mandate);
        session.user_authorization = authorization;
        session.status = SessionStatus::ReadyForComplete;
        session.challenge_id = None;
        session.updated_at = Utc::now();

        let stored = self
            .store
            .compare_and_swap(version, session)
            .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))?;

        tracing::info!(
            session_id = %id,
            mandate_id = %mandate_id,
            "payment mandate attached"
        );
        Ok(stored.view())
    }

    /// Completes a session, running the AP2 agent's adjudication.
    ///
    /// Idempotent for terminal sessions: a completed session returns its
    /// cached receipt, a failed one its terminal error receipt.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND`, `INVALID_STATE` (no mandate attached), or
    /// `INVALID_INPUT` (escalated session without a code). Payment
    /// failures are receipts, not errors.
    pub async fn complete(
        &self,
        id: &str,
        otp_code: Option<&str>,
    ) -> Result<CompleteResponse, ApiError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let session = self
            .store
            .get(id)
            .ok_or_else(|| ApiError::not_found(format!("checkout session not found: {id}")))?;

        match session.status {
            SessionStatus::Complete => {
                return cached_response(&session, CompleteStatus::Success);
            }
            SessionStatus::Failed => {
                return cached_response(&session, CompleteStatus::Failed);
            }
            SessionStatus::Incomplete => {
                return Err(ApiError::invalid_state(
                    "session has no payment mandate attached",
                ));
            }
            SessionStatus::ReadyForComplete | SessionStatus::RequiresEscalation => {}
        }

        let mandate = session
            .mandate
            .clone()
            .ok_or_else(|| ApiError::new(ErrorKind::Internal, "session lost its mandate"))?;

        if session.is_expired(Utc::now()) {
            let receipt = self.agent.error_receipt(
                &mandate,
                ReceiptCode::SessionExpired,
                "session expired awaiting completion",
            );
            return self.finalize(session, SessionStatus::Failed, receipt, CompleteStatus::Failed);
        }

        match session.status {
            SessionStatus::ReadyForComplete => self.complete_first_attempt(session, mandate).await,
            SessionStatus::RequiresEscalation => {
                self.complete_escalated(session, mandate, otp_code).await
            }
            _ => unreachable!("handled above"),
        }
    }

    /// Sweeps sessions whose inactivity window has passed, failing them
    /// with `SESSION_EXPIRED`. Returns the number of sessions failed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut swept = 0;
        for id in self.store.list_expired(now) {
            let lock = self.lock_for(&id);
            let _guard = lock.lock().await;

            let Some(session) = self.store.get(&id) else {
                continue;
            };
            if !session.is_expired(now) {
                continue;
            }
            let Some(mandate) = session.mandate.clone() else {
                continue;
            };
            let receipt = self.agent.error_receipt(
                &mandate,
                ReceiptCode::SessionExpired,
                "session expired awaiting completion",
            );
            if self
                .finalize(session, SessionStatus::Failed, receipt, CompleteStatus::Failed)
                .is_ok()
            {
                tracing::info!(session_id = %id, "expired checkout session failed");
                swept += 1;
            }
        }
        swept
    }

    async fn complete_first_attempt(
        &self,
        session: CheckoutSession,
        mandate: PaymentMandate,
    ) -> Result<CompleteResponse, ApiError> {
        let session_total =
            CurrencyAmount::new(session.totals.currency.clone(), session.totals.total);

        match self
            .agent
            .adjudicate(&session_total, &mandate, session.user_authorization.as_deref())
        {
            Adjudication::Reject { code, message } => {
                let receipt = self.agent.error_receipt(&mandate, code, message);
                self.finalize(session, SessionStatus::Failed, receipt, CompleteStatus::Failed)
            }
            Adjudication::StepUp => {
                let mandate_id = &mandate.payment_mandate_contents.payment_mandate_id;
                let payer_email = &mandate.payment_mandate_contents.payment_response.payer_email;
                let challenge_id = self.challenges.issue(mandate_id, payer_email);
                let (receipt, envelope) = self.agent.otp_receipt(&mandate);

                let mut session = session;
                let version = session.version;
                session.status = SessionStatus::RequiresEscalation;
                session.challenge_id = Some(challenge_id);
                session.updated_at = Utc::now();
                let stored = self
                    .store
                    .compare_and_swap(version, session)
                    .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))?;

                Ok(CompleteResponse {
                    status: CompleteStatus::OtpRequired,
                    session: stored.view(),
                    receipt,
                    otp_challenge: Some(envelope),
                })
            }
            Adjudication::Approve => {
                let receipt = self.agent.success_receipt(&mandate).await;
                self.finalize(
                    session,
                    SessionStatus::Complete,
                    receipt,
                    CompleteStatus::Success,
                )
            }
        }
    }

    async fn complete_escalated(
        &self,
        session: CheckoutSession,
        mandate: PaymentMandate,
        otp_code: Option<&str>,
    ) -> Result<CompleteResponse, ApiError> {
        let code = otp_code.ok_or_else(|| {
            ApiError::invalid_input("otp_code is required while the session requires escalation")
        })?;
        let mandate_id = mandate.payment_mandate_contents.payment_mandate_id.clone();

        match self.challenges.verify(&mandate_id, code) {
            VerifyOutcome::Approved => {
                // The challenge satisfied the risk demand; signature and
                // integrity still have to hold.
                let session_total =
                    CurrencyAmount::new(session.totals.currency.clone(), session.totals.total);
                match self.agent.adjudicate(
                    &session_total,
                    &mandate,
                    session.user_authorization.as_deref(),
                ) {
                    Adjudication::Reject { code, message } => {
                        let receipt = self.agent.error_receipt(&mandate, code, message);
                        self.finalize(
                            session,
                            SessionStatus::Failed,
                            receipt,
                            CompleteStatus::Failed,
                        )
                    }
                    Adjudication::Approve | Adjudication::StepUp => {
                        let receipt = self.agent.success_receipt(&mandate).await;
                        self.finalize(
                            session,
                            SessionStatus::Complete,
                            receipt,
                            CompleteStatus::Success,
                        )
                    }
                }
            }
            VerifyOutcome::Invalid { remaining } => {
                let receipt = self.agent.error_receipt(
                    &mandate,
                    ReceiptCode::InvalidOtp,
                    format!("invalid code, {remaining} attempts remaining"),
                );
                // Stay in requires_escalation; the attempt refreshes the
                // inactivity window.
                let mut session = session;
                let version = session.version;
                session.updated_at = Utc::now();
                let stored = self
                    .store
                    .compare_and_swap(version, session)
                    .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))?;

                Ok(CompleteResponse {
                    status: CompleteStatus::OtpRequired,
                    session: stored.view(),
                    receipt,
                    otp_challenge: Some(OtpChallengeEnvelope {
                        payment_mandate_id: mandate_id,
                        message: format!("Invalid code. {remaining} attempts remaining"),
                    }),
                })
            }
            VerifyOutcome::Exhausted => {
                let receipt = self.agent.error_receipt(
                    &mandate,
                    ReceiptCode::ChallengeExhausted,
                    "step-up challenge attempts exhausted",
                );
                self.finalize(session, SessionStatus::Failed, receipt, CompleteStatus::Failed)
            }
            VerifyOutcome::Expired | VerifyOutcome::NotFound => {
                let receipt = self.agent.error_receipt(
                    &mandate,
                    ReceiptCode::ChallengeExpired,
                    "step-up challenge expired",
                );
                self.finalize(session, SessionStatus::Failed, receipt, CompleteStatus::Failed)
            }
        }
    }

    /// Commits a terminal decision: stores the receipt, transitions the
    /// session, and drops any active challenge.
    fn finalize(
        &self,
        mut session: CheckoutSession,
        status: SessionStatus,
        receipt: PaymentReceipt,
        outcome: CompleteStatus,
    ) -> Result<CompleteResponse, ApiError> {
        debug_assert!(status.is_terminal());
        if let Some(mandate_id) = session.mandate_id() {
            self.challenges.cancel(mandate_id);
        }

        let version = session.version;
        session.status = status;
        session.receipt = Some(receipt.clone());
        session.challenge_id = None;
        session.updated_at = Utc::now();

        let stored = self
            .store
            .compare_and_swap(version, session)
            .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))?;

        Ok(CompleteResponse {
            status: outcome,
            session: stored.view(),
            receipt,
            otp_challenge: None,
        })
    }

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

fn cached_response(
    session: &CheckoutSession,
    status: CompleteStatus,
) -> Result<CompleteResponse, ApiError> {
    let receipt = session.receipt.clone().ok_or_else(|| {
        ApiError::new(
            ErrorKind::Internal,
            "terminal session is missing its receipt",
        )
    })?;
    Ok(CompleteResponse {
        status,
        session: session.view(),
        receipt,
        otp_challenge: None,
    })
}

fn well_formed_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_email() {
        assert!(well_formed_email("a@example.com"));
        assert!(well_formed_email("a.b+c@sub.example.com"));
        assert!(!well_formed_email("a"));
        assert!(!well_formed_email("@example.com"));
        assert!(!well_formed_email("a@"));
        assert!(!well_formed_email("a b@example.com"));
        assert!(!well_formed_email("a@b@c"));
    }

    #[test]
    fn test_zero_tax() {
        assert_eq!(zero_tax(100.0), 0.0);
    }
}
