//! Canonical JSON encoding for signed structures.
//!
//! The device signature on a payment mandate binds to the canonical
//! encoding of `payment_mandate_contents`, so the shopper (signer) and the
//! merchant (verifier) must produce identical bytes for identical
//! structures. The rules:
//!
//! - object keys in lexicographic order
//! - no insignificant whitespace
//! - UTF-8, string escaping per JSON
//! - integers rendered as integers; all other numbers are monetary and
//!   rendered with exactly two decimals, round-half-to-even
//!
//! Canonicalization disagreements surface only as `INVALID_AUTHORIZATION`
//! on the merchant, which makes this module the first place to look when
//! signature verification fails unexpectedly.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::amount::format_money;

/// Serializes a value to its canonical JSON string.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON.
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&mut out, &value);
    Ok(out)
}

/// SHA-256 digest of the canonical encoding. This is what device
/// credentials sign.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON.
pub fn digest<T: Serialize>(value: &T) -> Result<[u8; 32], serde_json::Error> {
    let canonical = to_canonical_string(value)?;
    Ok(Sha256::digest(canonical.as_bytes()).into())
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                // Non-integer numbers in signed payloads are monetary.
                out.push_str(&format_money(n.as_f64().unwrap_or(0.0)));
            }
        }
        Value::String(s) => {
            // serde_json performs the escaping; a String never fails.
            out.push_str(&serde_json::to_string(s).unwrap_or_default());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}
