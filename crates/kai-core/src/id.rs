// SPDX-License-Identifier: MIT OR Apache-2.0
//! 32-byte content digests and node addressing.
//!
//! Every object in the graph, node body or raw content blob, is addressed
//! by the blake3 hash of its bytes. Node ids for content-addressed kinds are
//! `blake3(kind || "\n" || canonical_json(payload))`; mutable-identity kinds
//! (Workspace, Review) get a freshly generated 128-bit value widened to
//! 32 bytes instead.

use crate::canon::{CanonError, canonical_json};
use crate::node::NodeKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Errors from digest parsing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestError {
    /// Input was not 64 lowercase hex characters / 32 bytes.
    #[error("malformed digest: {0}")]
    Malformed(String),
}

/// A 32-byte blake3 digest. Serialises as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

/// Node identifiers share the digest space: content-addressed kinds hash
/// their body, mutable-identity kinds embed a random 128-bit value.
pub type NodeId = Digest;

impl Digest {
    /// Byte length of a digest.
    pub const LEN: usize = 32;

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// A fresh mutable-identity id: a random 128-bit value in the first
    /// 16 bytes, zero-widened to 32.
    #[must_use]
    pub fn new_identity() -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
        Self(bytes)
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Malformed`] unless the slice is exactly
    /// 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DigestError::Malformed(format!("{} bytes", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Lowercase hex form (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a lowercase (or mixed-case) hex digest.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Malformed`] for wrong length or non-hex input.
    pub fn from_hex(s: &str) -> Result<Self, DigestError> {
        let bytes = hex::decode(s).map_err(|_| DigestError::Malformed(s.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Standard base64 form, used for wire byte fields.
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Parse a base64 digest.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Malformed`] for undecodable or wrong-length
    /// input.
    pub fn from_base64(s: &str) -> Result<Self, DigestError> {
        use base64::Engine as _;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|_| DigestError::Malformed(s.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Short prefix for logs (first 12 hex characters).
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Node addressing
// ---------------------------------------------------------------------------

/// The exact byte sequence a content-addressed node id is computed over:
/// `kind || 0x0A || canonical_json(payload)`.
///
/// # Errors
///
/// Propagates [`CanonError`] from canonicalisation.
pub fn node_bytes(kind: NodeKind, payload: &Value) -> Result<Vec<u8>, CanonError> {
    let canonical = canonical_json(payload)?;
    let kind_str = kind.as_str().as_bytes();
    let mut out = Vec::with_capacity(kind_str.len() + 1 + canonical.len());
    out.extend_from_slice(kind_str);
    out.push(b'\n');
    out.extend_from_slice(&canonical);
    Ok(out)
}

/// Compute the content address of a node.
///
/// # Errors
///
/// Propagates [`CanonError`] from canonicalisation.
pub fn node_id(kind: NodeKind, payload: &Value) -> Result<Digest, CanonError> {
    Ok(Digest::of(&node_bytes(kind, payload)?))
}

/// Split node body bytes back into `(kind, payload)`.
///
/// Returns `None` when the framing or either half is malformed.
#[must_use]
pub fn parse_node_bytes(bytes: &[u8]) -> Option<(NodeKind, Value)> {
    let newline = bytes.iter().position(|&b| b == b'\n')?;
    let kind = std::str::from_utf8(&bytes[..newline]).ok()?.parse().ok()?;
    let payload = serde_json::from_slice(&bytes[newline + 1..]).ok()?;
    Some((kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hex_roundtrip() {
        let d = Digest::of(b"hello");
        let back = Digest::from_hex(&d.to_hex()).unwrap();
        assert_eq!(d, back);
        assert_eq!(d.to_hex().len(), 64);
    }

    #[test]
    fn base64_roundtrip() {
        let d = Digest::of(b"payload");
        assert_eq!(Digest::from_base64(&d.to_base64()).unwrap(), d);
    }

    #[test]
    fn malformed_hex_rejected() {
        assert!(Digest::from_hex("zz").is_err());
        assert!(Digest::from_hex(&"ab".repeat(31)).is_err());
    }

    #[test]
    fn serde_uses_hex_strings() {
        let d = Digest::of(b"x");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.to_hex()));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn node_id_is_deterministic() {
        let payload = json!({"b": 1, "a": [1, 2]});
        let one = node_id(NodeKind::File, &payload).unwrap();
        let two = node_id(NodeKind::File, &payload).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn node_id_depends_on_kind() {
        let payload = json!({"name": "m", "paths": []});
        let a = node_id(NodeKind::Module, &payload).unwrap();
        let b = node_id(NodeKind::File, &payload).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_snapshot_fixture() {
        // The literal expected observation from the empty-init scenario.
        let payload = json!({
            "createdAt": 0,
            "fileCount": 0,
            "files": [],
            "sourceRef": "",
            "sourceType": "dir",
        });
        let body = node_bytes(NodeKind::Snapshot, &payload).unwrap();
        let expected = b"Snapshot\n{\"createdAt\":0,\"fileCount\":0,\"files\":[],\"sourceRef\":\"\",\"sourceType\":\"dir\"}";
        assert_eq!(body, expected);
        assert_eq!(node_id(NodeKind::Snapshot, &payload).unwrap(), Digest::of(expected));
    }

    #[test]
    fn parse_node_bytes_roundtrip() {
        let payload = json!({"path": "a.js", "lang": "javascript"});
        let bytes = node_bytes(NodeKind::File, &payload).unwrap();
        let (kind, back) = parse_node_bytes(&bytes).unwrap();
        assert_eq!(kind, NodeKind::File);
        assert_eq!(back, payload);
    }

    #[test]
    fn identity_ids_are_widened_and_unique() {
        let a = Digest::new_identity();
        let b = Digest::new_identity();
        assert_ne!(a, b);
        assert_eq!(&a.as_bytes()[16..], &[0u8; 16]);
    }
}
