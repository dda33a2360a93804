//! Deterministic step-up risk draw.
//!
//! The draw is a pure function of `(mandate_id, merchant_id)` so that
//! replays of the same mandate reach the same decision and tests are
//! reproducible. No ambient randomness participates in the decision path.

use sha2::{Digest, Sha256};

/// Default probability band for totals below the amount threshold.
pub const DEFAULT_THRESHOLD_SMALL: f64 = 0.10;

/// Default probability band for totals at or above the amount threshold.
pub const DEFAULT_THRESHOLD_LARGE: f64 = 0.30;

/// Produces a value in `[0, 1)` from the mandate and merchant ids.
#[must_use]
pub fn draw(mandate_id: &str, merchant_id: &str) -> f64 {
    let digest = Sha256::digest(format!("{mandate_id}:{merchant_id}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let numerator = u64::from_be_bytes(bytes);
    // 2^64 as f64; the ratio is always strictly below 1.
    #[allow(clippy::cast_precision_loss)]
    {
        numerator as f64 / 18_446_744_073_709_551_616.0
    }
}
