//! Wire error taxonomy shared by both services.
//!
//! Terminal payment decisions are carried in receipts, not here; `ApiError`
//! covers protocol misuse (bad input, wrong state, unknown ids) and
//! transport-level failures against collaborators.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error kinds surfaced in the `error_kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed request body or fields.
    InvalidInput,
    /// Unknown session id, mandate id, or user.
    NotFound,
    /// Operation not permitted in the session's current state.
    InvalidState,
    /// Mandate totals, currency, or payer email disagree with the session.
    MandateSessionMismatch,
    /// A mandate id was attached to a different session, or re-attached
    /// with different contents.
    MandateReuse,
    /// User authorization signature failed verification.
    InvalidAuthorization,
    /// Token, cryptogram, or card-field shape violations.
    MalformedMandate,
    /// The step-up challenge expired before a valid code arrived.
    ChallengeExpired,
    /// The step-up challenge ran out of attempts.
    ChallengeExhausted,
    /// The submitted one-time code did not verify.
    InvalidOtp,
    /// The session sat inactive past its expiry window.
    SessionExpired,
    /// Signer, catalog, or network adapter transport failure.
    UpstreamUnavailable,
    /// Uncategorized; logged with a correlation id.
    Internal,
}

impl ErrorKind {
    /// HTTP status code this kind maps to.
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::InvalidInput
            | Self::MandateSessionMismatch
            | Self::MalformedMandate
            | Self::InvalidOtp => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidState
            | Self::MandateReuse
            | Self::ChallengeExpired
            | Self::ChallengeExhausted
            | Self::SessionExpired => StatusCode::CONFLICT,
            Self::InvalidAuthorization => StatusCode::UNAUTHORIZED,
            Self::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body sent on the wire as `{error_kind, message}`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{error_kind:?}: {message}")]
pub struct ApiError {
    /// Machine-readable kind.
    pub error_kind: ErrorKind,
    /// Human-readable detail. Never contains PANs or key material.
    pub message: String,
}

impl ApiError {
    /// Creates an error of the given kind.
    pub fn new(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error_kind,
            message: message.into(),
        }
    }

    /// Shorthand for an `INVALID_INPUT` error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Shorthand for a `NOT_FOUND` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for an `INVALID_STATE` error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error_kind.status_code();
        (status, Json(self)).into_response()
    }
}
