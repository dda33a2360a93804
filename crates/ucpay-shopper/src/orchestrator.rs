//! Checkout orchestrator.
//!
//! Drives one purchase against the merchant and is the single place on
//! the shopper that mutates mandate/session state. Keeps at most one
//! in-flight mandate per session id and makes `confirm` idempotent: a
//! session that already completed returns its cached receipt without
//! re-signing or re-contacting the merchant.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use ucpay_core::amount::CurrencyAmount;
use ucpay_core::checkout::{CompleteResponse, CompleteStatus, LineItem, SessionStatus};
use ucpay_core::mandate::{PaymentMandate, PaymentMandateContents};
use ucpay_core::receipt::{OtpChallengeEnvelope, PaymentReceipt};

use crate::client::{ClientError, MerchantClient};
use crate::consumer::ConsumerAgent;
use crate::credentials::{CardView, CredentialsProvider, ProviderError};
use crate::tokenization::{AdapterError, AuthOutcome, TokenizationAdapter};

/// Errors from the orchestrator. Payment failures are outcomes, not
/// errors; these cover misuse and hard failures before a session exists.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No in-flight checkout for that session id.
    #[error("no in-flight checkout for session {0}")]
    UnknownSession(String),

    /// Credentials provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Merchant client failure while preparing.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Who issued the pending challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeSource {
    /// The merchant's AP2 agent.
    Merchant,
    /// The card network's authentication service.
    Network,
}

/// Outcome of `confirm` or `submit_otp`.
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// Payment captured.
    Success(PaymentReceipt),
    /// A one-time code is needed before completion.
    OtpRequired {
        /// Challenge to surface to the user.
        challenge: OtpChallengeEnvelope,
        /// Who issued it.
        source: ChallengeSource,
    },
    /// The attempt failed terminally; a new cart and session are needed.
    Failed {
        /// Human-readable reason.
        message: String,
        /// The merchant's receipt, when one was issued.
        receipt: Option<PaymentReceipt>,
    },
    /// The deadline passed and a follow-up Get could not settle the
    /// outcome.
    Indeterminate,
}

/// What `prepare` hands back for the user to approve.
#[derive(Debug, Clone)]
pub struct PreparedCheckout {
    /// The merchant's session id.
    pub session_id: String,
    /// The unsigned mandate contents the device will sign.
    pub contents: PaymentMandateContents,
    /// Display view of the instrument being charged.
    pub card: CardView,
}

struct InFlight {
    contents: PaymentMandateContents,
    user_email: String,
    instrument_token_reference: Option<String>,
    authorization: Option<String>,
    receipt: Option<PaymentReceipt>,
    network_challenge: Option<String>,
}

/// Shopper-side checkout orchestrator.
pub struct CheckoutOrchestrator {
    client: Arc<MerchantClient>,
    credentials: Arc<CredentialsProvider>,
    consumer: ConsumerAgent,
    tokenization: Arc<dyn TokenizationAdapter>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl CheckoutOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        client: Arc<MerchantClient>,
        credentials: Arc<CredentialsProvider>,
        tokenization: Arc<dyn TokenizationAdapter>,
    ) -> Self {
        Self {
            client,
            credentials,
            consumer: ConsumerAgent::new(),
            tokenization,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a session on the merchant and assembles the unsigned mandate
    /// bound to the session total and the user's default instrument.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown user or a merchant failure.
    pub async fn prepare(
        &self,
        line_items: Vec<LineItem>,
        user_email: &str,
        currency: &str,
    ) -> Result<PreparedCheckout, OrchestratorError> {
        let instrument = self.credentials.default_instrument(user_email)?;
        let payer_name = self
            .credentials
            .user(user_email)
            .map(|u| u.display_name)
            .unwrap_or_default();

        let merchant_agent = self.client.merchant_agent_id().await?;
        let session = self
            .client
            .create_session(line_items, user_email, currency)
            .await?;

        // The merchant's computed total is authoritative for the mandate.
        let total = CurrencyAmount::new(session.totals.currency.clone(), session.totals.total);
        let contents = self.consumer.assemble(
            &total,
            &instrument,
            &session.buyer_email,
            &payer_name,
            &merchant_agent,
        );
        let card = instrument.view();

        let prepared = PreparedCheckout {
            session_id: session.id.clone(),
            contents: contents.clone(),
            card,
        };

        let mut in_flight = self.in_flight.lock().await;
        in_flight.insert(
            session.id,
            InFlight {
                contents,
                user_email: user_email.trim().to_lowercase(),
                instrument_token_reference: instrument
                    .token_reference
                    .clone()
                    .filter(|_| instrument.is_tokenized),
                authorization: None,
                receipt: None,
                network_challenge: None,
            },
        );
        Ok(prepared)
    }

    /// The unsigned mandate contents for an in-flight session.
    pub async fn prepared_contents(
        &self,
        session_id: &str,
    ) -> Result<PaymentMandateContents, OrchestratorError> {
        let in_flight = self.in_flight.lock().await;
        in_flight
            .get(session_id)
            .map(|f| f.contents.clone())
            .ok_or_else(|| OrchestratorError::UnknownSession(session_id.to_string()))
    }

    /// The buyer email for an in-flight session.
    pub async fn prepared_email(&self, session_id: &str) -> Result<String, OrchestratorError> {
        let in_flight = self.in_flight.lock().await;
        in_flight
            .get(session_id)
            .map(|f| f.user_email.clone())
            .ok_or_else(|| OrchestratorError::UnknownSession(session_id.to_string()))
    }

    /// Attaches the signed mandate and asks the merchant to complete.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown session id; merchant and network
    /// outcomes are reported through [`ConfirmOutcome`].
    pub async fn confirm(
        &self,
        session_id: &str,
        user_authorization: String,
    ) -> Result<ConfirmOutcome, OrchestratorError> {
        // Idempotent retry: a completed session returns the cached
        // receipt without re-signing.
        let (total, token_reference) = {
            let mut in_flight = self.in_flight.lock().await;
            let flight = in_flight
                .get_mut(session_id)
                .ok_or_else(|| OrchestratorError::UnknownSession(session_id.to_string()))?;
            if let Some(receipt) = flight.receipt.clone() {
                return Ok(ConfirmOutcome::Success(receipt));
            }
            flight.authorization = Some(user_authorization);
            (
                flight.contents.payment_details_total.amount.clone(),
                flight.instrument_token_reference.clone(),
            )
        };

        // Optional network step-up before contacting the merchant.
        if let Some(token_reference) = token_reference {
            match self
                .network_authenticate(session_id, &token_reference, &total)
                .await
            {
                NetworkGate::Proceed => {}
                NetworkGate::Challenge(outcome) | NetworkGate::Declined(outcome) => {
                    return Ok(outcome);
                }
            }
        }

        self.attach_and_complete(session_id).await
    }

    /// Submits a one-time code for the pending challenge (network or
    /// merchant) and drives completion.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown session id.
    pub async fn submit_otp(
        &self,
        session_id: &str,
        code: &str,
    ) -> Result<ConfirmOutcome, OrchestratorError> {
        let network_challenge = {
            let in_flight = self.in_flight.lock().await;
            let flight = in_flight
                .get(session_id)
                .ok_or_else(|| OrchestratorError::UnknownSession(session_id.to_string()))?;
            if let Some(receipt) = flight.receipt.clone() {
                return Ok(ConfirmOutcome::Success(receipt));
            }
            flight.network_challenge.clone()
        };

        if let Some(challenge_id) = network_challenge {
            let adapter = Arc::clone(&self.tokenization);
            let code_owned = code.to_string();
            let verified = tokio::task::spawn_blocking(move || {
                adapter.verify(&challenge_id, &code_owned)
            })
            .await
            .unwrap_or(Err(AdapterError::Transport("join error".to_string())));

            match verified {
                Ok(true) => {
                    let mut in_flight = self.in_flight.lock().await;
                    if let Some(flight) = in_flight.get_mut(session_id) {
                        flight.network_challenge = None;
                    }
                }
                Ok(false) => {
                    return Ok(ConfirmOutcome::Failed {
                        message: "network verification declined".to_string(),
                        receipt: None,
                    });
                }
                Err(error) => {
                    // Adapter failures never block the core flow.
                    tracing::warn!(%error, "network verify failed, proceeding without it");
                    let mut in_flight = self.in_flight.lock().await;
                    if let Some(flight) = in_flight.get_mut(session_id) {
                        flight.network_challenge = None;
                    }
                }
            }
            return self.attach_and_complete(session_id).await;
        }

        // Merchant-issued challenge: the mandate is already attached;
        // retry Complete with the code.
        match self.client.complete_session(session_id, Some(code)).await {
            Ok(response) => Ok(self.map_completion(session_id, response).await),
            Err(error) => self.settle_after_transport_error(session_id, &error).await,
        }
    }

    async fn attach_and_complete(
        &self,
        session_id: &str,
    ) -> Result<ConfirmOutcome, OrchestratorError> {
        let mandate = {
            let in_flight = self.in_flight.lock().await;
            let flight = in_flight
                .get(session_id)
                .ok_or_else(|| OrchestratorError::UnknownSession(session_id.to_string()))?;
            PaymentMandate {
                payment_mandate_contents: flight.contents.clone(),
                user_authorization: flight.authorization.clone(),
            }
        };

        if let Err(error) = self.client.update_session(session_id, mandate).await {
            return self.settle_after_transport_error(session_id, &error).await;
        }

        match self.client.complete_session(session_id, None).await {
            Ok(response) => Ok(self.map_completion(session_id, response).await),
            Err(error) => self.settle_after_transport_error(session_id, &error).await,
        }
    }

    async fn map_completion(&self, session_id: &str, response: CompleteResponse) -> ConfirmOutcome {
        match response.status {
            CompleteStatus::Success => {
                let mut in_flight = self.in_flight.lock().await;
                if let Some(flight) = in_flight.get_mut(session_id) {
                    flight.receipt = Some(response.receipt.clone());
                }
                ConfirmOutcome::Success(response.receipt)
            }
            CompleteStatus::OtpRequired => {
                let challenge = response.otp_challenge.unwrap_or(OtpChallengeEnvelope {
                    payment_mandate_id: response.receipt.payment_mandate_id.clone(),
                    message: "One-time code required".to_string(),
                });
                ConfirmOutcome::OtpRequired {
                    challenge,
                    source: ChallengeSource::Merchant,
                }
            }
            CompleteStatus::Failed => ConfirmOutcome::Failed {
                message: response
                    .receipt
                    .payment_status
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "payment failed".to_string()),
                receipt: Some(response.receipt),
            },
        }
    }

    /// After a transport failure the outcome is indeterminate; one Get
    /// settles it when the session already reached a terminal state.
    async fn settle_after_transport_error(
        &self,
        session_id: &str,
        error: &ClientError,
    ) -> Result<ConfirmOutcome, OrchestratorError> {
        if let Some(api_error) = error.api_error() {
            // The merchant answered; this is a protocol rejection, not an
            // unknown outcome.
            return Ok(ConfirmOutcome::Failed {
                message: api_error.message.clone(),
                receipt: None,
            });
        }

        tracing::warn!(%error, session_id, "transport failure, polling session state");
        match self.client.get_session(session_id).await {
            Ok(view) if view.status == SessionStatus::Complete => {
                let receipt = view.receipt;
                if let Some(receipt) = receipt {
                    let mut in_flight = self.in_flight.lock().await;
                    if let Some(flight) = in_flight.get_mut(session_id) {
                        flight.receipt = Some(receipt.clone());
                    }
                    return Ok(ConfirmOutcome::Success(receipt));
                }
                Ok(ConfirmOutcome::Indeterminate)
            }
            Ok(view) if view.status == SessionStatus::Failed => Ok(ConfirmOutcome::Failed {
                message: "payment failed".to_string(),
                receipt: view.receipt,
            }),
            _ => Ok(ConfirmOutcome::Indeterminate),
        }
    }

    async fn network_authenticate(
        &self,
        session_id: &str,
        token_reference: &str,
        total: &CurrencyAmount,
    ) -> NetworkGate {
        if !self.tokenization.is_enabled() {
            return NetworkGate::Proceed;
        }

        let adapter = Arc::clone(&self.tokenization);
        let merchant_id = match self.client.merchant_agent_id().await {
            Ok(id) => id,
            Err(_) => return NetworkGate::Proceed,
        };
        let token_reference = token_reference.to_string();
        let amount = total.value;
        let currency = total.currency.clone();
        let transaction_id = session_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            adapter.authenticate(&token_reference, amount, &currency, &merchant_id, &transaction_id)
        })
        .await
        .unwrap_or(Err(AdapterError::Transport("join error".to_string())));

        match outcome {
            Ok(AuthOutcome::NotRequired) => NetworkGate::Proceed,
            Ok(AuthOutcome::Required { challenge_id, .. }) => {
                let mandate_id = {
                    let mut in_flight = self.in_flight.lock().await;
                    match in_flight.get_mut(session_id) {
                        Some(flight) => {
                            flight.network_challenge = Some(challenge_id);
                            flight.contents.payment_mandate_id.clone()
                        }
                        None => return NetworkGate::Proceed,
                    }
                };
                NetworkGate::Challenge(ConfirmOutcome::OtpRequired {
                    challenge: OtpChallengeEnvelope {
                        payment_mandate_id: mandate_id,
                        message: "Card network verification required".to_string(),
                    },
                    source: ChallengeSource::Network,
                })
            }
            Ok(AuthOutcome::Declined) => NetworkGate::Declined(ConfirmOutcome::Failed {
                message: "declined by card network".to_string(),
                receipt: None,
            }),
            Err(error) => {
                // Degrade: the network step is strictly additive.
                tracing::warn!(%error, "network authentication unavailable, continuing");
                NetworkGate::Proceed
            }
        }
    }
}

enum NetworkGate {
    Proceed,
    Challenge(ConfirmOutcome),
    Declined(ConfirmOutcome),
}
