//! URL-safe base64 discipline for all binary values on the wire.
//!
//! Challenges, credential ids, signatures, and authenticator data are
//! encoded URL-safe without padding. Decoding accepts both padded and
//! unpadded forms, since not every peer strips the `=` tail.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use thiserror::Error;

/// Error produced when a wire value is not valid URL-safe base64.
#[derive(Debug, Error)]
#[error("invalid base64: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Encodes bytes as URL-safe base64 without padding.
#[must_use]
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes URL-safe base64, accepting padded and unpadded input.
///
/// # Errors
///
/// Returns an error if the input is not valid URL-safe base64 in either
/// form.
pub fn decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    match URL_SAFE_NO_PAD.decode(input) {
        Ok(bytes) => Ok(bytes),
        Err(_) => Ok(URL_SAFE.decode(input)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cases: &[&[u8]] = &[b"", b"a", b"ab", b"abc", &[0xff, 0xfe, 0x00, 0x7f]];
        for case in cases {
            let encoded = encode(case);
            assert!(!encoded.contains('='));
            assert_eq!(decode(&encoded).unwrap(), *case);
        }
    }

    #[test]
    fn test_accepts_padded_input() {
        let padded = URL_SAFE.encode(b"signature-bytes");
        assert!(padded.ends_with('='));
        assert_eq!(decode(&padded).unwrap(), b"signature-bytes");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode("not base64 at all!").is_err());
    }
}
