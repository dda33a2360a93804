//! HTTP surface of the shopper service.
//!
//! A thin JSON API for the chat UI (an external collaborator): user
//! registration, card listing, and the three orchestrator operations.
//! Handlers translate HTTP to component calls and nothing else.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use ucpay_core::checkout::LineItem;
use ucpay_core::enrollment::RegisterCredentialRequest;
use ucpay_core::error::{ApiError, ErrorKind};
use ucpay_core::receipt::{OtpChallengeEnvelope, PaymentReceipt};

use crate::client::MerchantClient;
use crate::credentials::{CardView, CredentialsProvider, ProviderError};
use crate::device::SoftwareAuthenticator;
use crate::orchestrator::{
    ChallengeSource, CheckoutOrchestrator, ConfirmOutcome, OrchestratorError,
};
use crate::tokenization::TokenizationAdapter;

/// Shared state behind every shopper handler.
pub struct ShopperState {
    /// Credentials provider.
    pub credentials: Arc<CredentialsProvider>,
    /// Software device authenticator.
    pub device: Arc<SoftwareAuthenticator>,
    /// Merchant client.
    pub client: Arc<MerchantClient>,
    /// Checkout orchestrator.
    pub orchestrator: CheckoutOrchestrator,
    /// Tokenization adapter, consulted at enrollment.
    pub tokenization: Arc<dyn TokenizationAdapter>,
}

/// Builds the shopper router.
pub fn router(state: Arc<ShopperState>) -> Router {
    Router::new()
        .route("/api/users/register", post(register_user))
        .route("/api/users/{email}/cards", get(list_cards))
        .route("/api/checkout/prepare", post(prepare_checkout))
        .route("/api/checkout/confirm", post(confirm_checkout))
        .route("/api/checkout/otp", post(submit_otp))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    display_name: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    email: String,
    credential_id: String,
    card: CardView,
    merchant_registered: bool,
}

async fn register_user(
    State(state): State<Arc<ShopperState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let enrollment = state
        .credentials
        .register(&request.email, &request.display_name, &state.device)
        .map_err(provider_error)?;

    let email = request.email.trim().to_lowercase();

    // Bind the instrument to a network token when the adapter is live.
    // Failures degrade to the locally generated token path.
    if state.tokenization.is_enabled() {
        tokenize_default_instrument(&state, &email).await;
    }

    // The merchant needs the public key on file to verify mandates.
    let merchant_registered = match state
        .client
        .register_credential(&RegisterCredentialRequest {
            payer_email: email.clone(),
            credential_id: enrollment.credential_id.clone(),
            public_key: enrollment.public_key.clone(),
        })
        .await
    {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(%error, "credential registration with merchant failed");
            false
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            email,
            credential_id: enrollment.credential_id,
            card: enrollment.card,
            merchant_registered,
        }),
    ))
}

async fn tokenize_default_instrument(state: &Arc<ShopperState>, email: &str) {
    let Ok(instrument) = state.credentials.default_instrument(email) else {
        return;
    };
    let Ok(pan) = state.credentials.reveal_pan(&instrument) else {
        return;
    };

    let adapter = Arc::clone(&state.tokenization);
    let (month, year) = (instrument.expiry_month, instrument.expiry_year);
    let result =
        tokio::task::spawn_blocking(move || adapter.tokenize(&pan, month, year)).await;

    match result {
        Ok(Ok(tokenized)) => {
            if let Err(error) = state
                .credentials
                .mark_tokenized(email, &instrument.id, &tokenized)
            {
                tracing::warn!(%error, "could not persist network token");
            }
        }
        Ok(Err(error)) => {
            tracing::warn!(%error, "tokenization unavailable, using local tokens");
        }
        Err(error) => {
            tracing::warn!(%error, "tokenization task failed, using local tokens");
        }
    }
}

async fn list_cards(
    State(state): State<Arc<ShopperState>>,
    Path(email): Path<String>,
) -> Result<Json<Vec<CardView>>, ApiError> {
    if state.credentials.user(&email).is_none() {
        return Err(ApiError::not_found(format!("unknown user: {email}")));
    }
    Ok(Json(state.credentials.cards(&email)))
}

#[derive(Debug, Deserialize)]
struct PrepareRequest {
    line_items: Vec<LineItem>,
    user_email: String,
    #[serde(default = "default_currency")]
    currency: String,
}

fn default_currency() -> String {
    "SGD".to_string()
}

#[derive(Debug, Serialize)]
struct PrepareResponse {
    session_id: String,
    mandate_id: String,
    total: serde_json::Value,
    card: CardView,
}

async fn prepare_checkout(
    State(state): State<Arc<ShopperState>>,
    Json(request): Json<PrepareRequest>,
) -> Result<Json<PrepareResponse>, ApiError> {
    let prepared = state
        .orchestrator
        .prepare(request.line_items, &request.user_email, &request.currency)
        .await
        .map_err(orchestrator_error)?;

    Ok(Json(PrepareResponse {
        session_id: prepared.session_id,
        mandate_id: prepared.contents.payment_mandate_id.clone(),
        total: serde_json::to_value(&prepared.contents.payment_details_total.amount)
            .unwrap_or_default(),
        card: prepared.card,
    }))
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    session_id: String,
}

/// Wire form of a confirm / OTP outcome.
#[derive(Debug, Serialize)]
struct OutcomeResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    receipt: Option<PaymentReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp_challenge: Option<OtpChallengeEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge_source: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn confirm_checkout(
    State(state): State<Arc<ShopperState>>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    // Sign with the device credential on behalf of the session's buyer.
    let contents = state
        .orchestrator
        .prepared_contents(&request.session_id)
        .await
        .map_err(orchestrator_error)?;
    let email = state
        .orchestrator
        .prepared_email(&request.session_id)
        .await
        .map_err(orchestrator_error)?;

    let authorization = state
        .credentials
        .authorize_mandate(&email, &contents, &state.device)
        .map_err(provider_error)?;

    let outcome = state
        .orchestrator
        .confirm(&request.session_id, authorization)
        .await
        .map_err(orchestrator_error)?;
    Ok(Json(outcome_response(outcome)))
}

#[derive(Debug, Deserialize)]
struct OtpRequest {
    session_id: String,
    code: String,
}

async fn submit_otp(
    State(state): State<Arc<ShopperState>>,
    Json(request): Json<OtpRequest>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state
        .orchestrator
        .submit_otp(&request.session_id, &request.code)
        .await
        .map_err(orchestrator_error)?;
    Ok(Json(outcome_response(outcome)))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "ucpay-shopper",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    }))
}

fn outcome_response(outcome: ConfirmOutcome) -> OutcomeResponse {
    match outcome {
        ConfirmOutcome::Success(receipt) => OutcomeResponse {
            status: "success",
            receipt: Some(receipt),
            otp_challenge: None,
            challenge_source: None,
            message: None,
        },
        ConfirmOutcome::OtpRequired { challenge, source } => OutcomeResponse {
            status: "otp_required",
            receipt: None,
            otp_challenge: Some(challenge),
            challenge_source: Some(match source {
                ChallengeSource::Merchant => "merchant",
                ChallengeSource::Network => "network",
            }),
            message: None,
        },
        ConfirmOutcome::Failed { message, receipt } => OutcomeResponse {
            status: "failed",
            receipt,
            otp_challenge: None,
            challenge_source: None,
            message: Some(message),
        },
        ConfirmOutcome::Indeterminate => OutcomeResponse {
            status: "indeterminate",
            receipt: None,
            otp_challenge: None,
            challenge_source: None,
            message: Some("outcome unknown; check the session before retrying".to_string()),
        },
    }
}

fn provider_error(error: ProviderError) -> ApiError {
    let kind = match &error {
        ProviderError::UnknownUser(_) | ProviderError::NoInstrument(_) => ErrorKind::NotFound,
        ProviderError::AlreadyRegistered(_) | ProviderError::MalformedEmail(_) => {
            ErrorKind::InvalidInput
        }
        ProviderError::DeviceVerification(_) | ProviderError::CounterRegression => {
            ErrorKind::InvalidAuthorization
        }
        ProviderError::Vault(_) | ProviderError::Canonical(_) => ErrorKind::Internal,
    };
    ApiError::new(kind, error.to_string())
}

fn orchestrator_error(error: OrchestratorError) -> ApiError {
    match error {
        OrchestratorError::UnknownSession(id) => {
            ApiError::not_found(format!("no in-flight checkout for session {id}"))
        }
        OrchestratorError::Provider(error) => provider_error(error),
        OrchestratorError::Client(error) => match error.api_error() {
            Some(api) => api.clone(),
            None => ApiError::new(ErrorKind::UpstreamUnavailable, error.to_string()),
        },
    }
}
