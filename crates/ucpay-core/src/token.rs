//! Per-transaction payment token and cryptogram generation.
//!
//! These are freshly generated for every mandate; they are not long-lived
//! tokens. When a network tokenization adapter is enabled and the
//! instrument is tokenized, the network-issued token replaces the local
//! one, but the cryptogram is still generated here unless the network
//! supplies its own.

use rand::{Rng, RngCore};
use uuid::Uuid;

/// Generates a 16-digit numeric payment token.
#[must_use]
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

/// Generates a 32-character uppercase hex cryptogram.
#[must_use]
pub fn generate_cryptogram() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// Generates a collision-resistant mandate id in the `PM-` format.
#[must_use]
pub fn generate_mandate_id() -> String {
    format!(
        "PM-{}",
        &Uuid::new_v4().simple().to_string().to_uppercase()[..16]
    )
}

/// Generates a payment-details request id in the `REQ-` format.
#[must_use]
pub fn generate_request_id() -> String {
    format!(
        "REQ-{}",
        &Uuid::new_v4().simple().to_string().to_uppercase()[..12]
    )
}
