//! # ucpay-core
//!
//! Shared protocol library for the ucpay two-party commerce demonstrator.
//!
//! This crate carries everything both services must agree on byte-for-byte:
//! the AP2 payment-mandate and receipt wire shapes, the UCP checkout-session
//! and discovery documents, the canonical JSON encoding that mandate
//! signatures bind to, the URL-safe base64 discipline, the deterministic
//! step-up risk draw, and the `error_kind` taxonomy surfaced on the wire.
//!
//! The merchant service (`ucpay-merchant`) and the shopper service
//! (`ucpay-shopper`) both depend on this crate and on nothing in each other.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod amount;
pub mod canonical;
pub mod checkout;
pub mod discovery;
pub mod encoding;
pub mod enrollment;
pub mod error;
pub mod mandate;
pub mod receipt;
pub mod risk;
pub mod token;

pub use amount::CurrencyAmount;
pub use error::{ApiError, ErrorKind};
pub use mandate::{PaymentMandate, PaymentMandateContents};
pub use receipt::{PaymentReceipt, ReceiptCode};
