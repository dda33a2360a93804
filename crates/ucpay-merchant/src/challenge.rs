//! Step-up challenge lifecycle.
//!
//! A challenge is bound to one mandate; issuing a new one for the same
//! mandate replaces the old, so at most one is ever active. Codes are
//! stored as salted SHA-256 hashes; the plaintext exists only in the
//! demo-mode log line. Challenges expire after five minutes and allow
//! three attempts.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Challenge lifetime.
pub const CHALLENGE_TTL_SECS: i64 = 300;

/// Maximum verification attempts per challenge.
pub const MAX_ATTEMPTS: u32 = 3;

/// The well-known demo-mode code.
pub const DEMO_OTP_CODE: &str = "123456";

/// Verification method for a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMethod {
    /// Six-digit one-time code.
    Otp,
}

/// An issued step-up challenge.
#[derive(Debug, Clone)]
pub struct StepUpChallenge {
    /// Challenge id, `CHAL-` prefixed.
    pub id: String,
    /// The mandate this challenge gates.
    pub mandate_id: String,
    /// Verification method.
    pub method: ChallengeMethod,
    /// Attempts consumed so far.
    pub attempts: u32,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    salt: [u8; 16],
    code_hash: [u8; 32],
}

/// Outcome of verifying a submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The code matched; the challenge is consumed.
    Approved,
    /// The code did not match; attempts remain.
    Invalid {
        /// Attempts left after this one.
        remaining: u32,
    },
    /// The code did not match and no attempts remain.
    Exhausted,
    /// The challenge expired before a valid code arrived.
    Expired,
    /// No active challenge exists for the mandate.
    NotFound,
}

/// In-memory challenge store, one active challenge per mandate.
pub struct ChallengeStore {
    inner: Mutex<HashMap<String, StepUpChallenge>>,
    demo_mode: bool,
}

impl ChallengeStore {
    /// Creates a store. In demo mode every challenge uses
    /// [`DEMO_OTP_CODE`]; otherwise codes are random six-digit numerics.
    #[must_use]
    pub fn new(demo_mode: bool) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            demo_mode,
        }
    }

    /// Issues a challenge for a mandate, replacing any active one.
    /// Returns the challenge id.
    pub fn issue(&self, mandate_id: &str, payer_email: &str) -> String {
        let code = if self.demo_mode {
            DEMO_OTP_CODE.to_string()
        } else {
            let mut rng = rand::thread_rng();
            format!("{:06}", rng.gen_range(0..1_000_000))
        };

        let mut salt = [0u8; 16];
        rand::thread_rng().fill(&mut salt);

        let challenge = StepUpChallenge {
            id: format!(
                "CHAL-{}",
                &Uuid::new_v4().simple().to_string().to_uppercase()[..8]
            ),
            mandate_id: mandate_id.to_string(),
            method: ChallengeMethod::Otp,
            attempts: 0,
            expires_at: Utc::now() + Duration::seconds(CHALLENGE_TTL_SECS),
            salt,
            code_hash: hash_code(&salt, &code),
        };
        let id = challenge.id.clone();

        if self.demo_mode {
            tracing::info!(
                mandate_id = %mandate_id,
                payer_email = %payer_email,
                code = %code,
                "issued demo step-up challenge"
            );
        } else {
            tracing::info!(
                mandate_id = %mandate_id,
                payer_email = %payer_email,
                "issued step-up challenge"
            );
        }

        let mut inner = self.inner.lock().unwrap();
        inner.insert(mandate_id.to_string(), challenge);
        id
    }

    /// Verifies a submitted code against the mandate's active challenge.
    ///
    /// A mismatching code consumes one attempt; expiry, exhaustion, and
    /// approval all remove the challenge.
    pub fn verify(&self, mandate_id: &str, code: &str) -> VerifyOutcome {
        let mut inner = self.inner.lock().unwrap();
        let Some(challenge) = inner.get_mut(mandate_id) else {
            return VerifyOutcome::NotFound;
        };

        if Utc::now() > challenge.expires_at {
            inner.remove(mandate_id);
            return VerifyOutcome::Expired;
        }

        challenge.attempts += 1;

        let well_formed = code.len() == 6 && code.chars().all(|c| c.is_ascii_digit());
        if well_formed && hash_code(&challenge.salt, code) == challenge.code_hash {
            inner.remove(mandate_id);
            return VerifyOutcome::Approved;
        }

        if challenge.attempts >= MAX_ATTEMPTS {
            inner.remove(mandate_id);
            return VerifyOutcome::Exhausted;
        }

        VerifyOutcome::Invalid {
            remaining: MAX_ATTEMPTS - challenge.attempts,
        }
    }

    /// Drops the active challenge for a mandate, if any. Called when a new
    /// mandate replaces the one the challenge was bound to.
    pub fn cancel(&self, mandate_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.remove(mandate_id);
    }

    /// Whether a mandate has an active challenge.
    #[must_use]
    pub fn has_active(&self, mandate_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.contains_key(mandate_id)
    }
}

fn hash_code(salt: &[u8; 16], code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(code.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_code_approves() {
        let store = ChallengeStore::new(true);
        store.issue("PM-1", "a@example.com");
        assert_eq!(store.verify("PM-1", DEMO_OTP_CODE), VerifyOutcome::Approved);
        // Consumed on approval.
        assert_eq!(store.verify("PM-1", DEMO_OTP_CODE), VerifyOutcome::NotFound);
    }

    #[test]
    fn test_wrong_code_exhausts_after_three() {
        let store = ChallengeStore::new(true);
        store.issue("PM-1", "a@example.com");

        assert_eq!(
            store.verify("PM-1", "000000"),
            VerifyOutcome::Invalid { remaining: 2 }
        );
        assert_eq!(
            store.verify("PM-1", "000000"),
            VerifyOutcome::Invalid { remaining: 1 }
        );
        assert_eq!(store.verify("PM-1", "000000"), VerifyOutcome::Exhausted);
        assert_eq!(store.verify("PM-1", "000000"), VerifyOutcome::NotFound);
    }

    #[test]
    fn test_malformed_code_counts_as_attempt() {
        let store = ChallengeStore::new(true);
        store.issue("PM-1", "a@example.com");
        assert_eq!(
            store.verify("PM-1", "12345"),
            VerifyOutcome::Invalid { remaining: 2 }
        );
        assert_eq!(
            store.verify("PM-1", "abcdef"),
            VerifyOutcome::Invalid { remaining: 1 }
        );
    }

    #[test]
    fn test_reissue_replaces_active_challenge() {
        let store = ChallengeStore::new(true);
        let first = store.issue("PM-1", "a@example.com");
        let second = store.issue("PM-1", "a@example.com");
        assert_ne!(first, second);
        // Attempts reset with the new challenge.
        assert_eq!(
            store.verify("PM-1", "000000"),
            VerifyOutcome::Invalid { remaining: 2 }
        );
    }

    #[test]
    fn test_cancel() {
        let store = ChallengeStore::new(true);
        store.issue("PM-1", "a@example.com");
        assert!(store.has_active("PM-1"));
        store.cancel("PM-1");
        assert!(!store.has_active("PM-1"));
        assert_eq!(store.verify("PM-1", DEMO_OTP_CODE), VerifyOutcome::NotFound);
    }

    #[test]
    fn test_expired_challenge() {
        let store = ChallengeStore::new(true);
        store.issue("PM-1", "a@example.com");
        {
            let mut inner = store.inner.lock().unwrap();
            inner.get_mut("PM-1").unwrap().expires_at = Utc::now() - Duration::seconds(1);
        }
        assert_eq!(store.verify("PM-1", DEMO_OTP_CODE), VerifyOutcome::Expired);
    }

    #[test]
    fn test_random_codes_outside_demo_mode() {
        let store = ChallengeStore::new(false);
        store.issue("PM-1", "a@example.com");
        // The fixed demo code is overwhelmingly unlikely to be drawn; a
        // mismatch must consume an attempt rather than approve.
        let outcome = store.verify("PM-1", "999999");
        assert!(matches!(
            outcome,
            VerifyOutcome::Invalid { .. } | VerifyOutcome::Approved
        ));
    }
}
