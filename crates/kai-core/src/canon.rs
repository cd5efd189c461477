// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON encoding.
//!
//! Content addressing only works if every implementation produces the same
//! bytes for the same payload. The canonical form is JSON with object keys
//! sorted lexicographically (byte-wise over UTF-8), no insignificant
//! whitespace, integers rendered without a fraction, floats in their
//! shortest round-tripping decimal form, and only the escapes JSON
//! requires. Arrays keep insertion order. There is no trailing newline.

use serde_json::Value;
use std::fmt::Write as _;

/// Errors produced while canonicalising a payload.
#[derive(Debug, thiserror::Error)]
pub enum CanonError {
    /// The payload contains a number JSON cannot represent canonically.
    #[error("non-finite number cannot be canonicalised")]
    NonFiniteNumber,
}

/// Encode `value` into canonical JSON bytes.
///
/// # Errors
///
/// Returns [`CanonError::NonFiniteNumber`] if a float inside the payload is
/// NaN or infinite (such values cannot appear in interchange JSON).
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, CanonError> {
    Ok(canonical_json_string(value)?.into_bytes())
}

/// Encode `value` into a canonical JSON string.
///
/// # Errors
///
/// Same failure modes as [`canonical_json`].
pub fn canonical_json_string(value: &Value) -> Result<String, CanonError> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value) -> Result<(), CanonError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CanonError::NonFiniteNumber);
                }
            }
            // serde_json renders integers via itoa and floats via ryu, which
            // is exactly the shortest round-tripping decimal form.
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            // String's Ord is byte-wise over UTF-8, which is the required
            // lexicographic key order.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()])?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Write a JSON string with only the escapes the grammar requires: quote,
/// backslash, and control characters below U+0020 (using the short forms
/// where they exist). Everything else, including non-BMP code points, is
/// emitted as raw UTF-8.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
