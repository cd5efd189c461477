// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-pack
//!
//! The pack wire format: a zstd-compressed stream whose decompressed
//! layout is
//!
//! ```text
//! [ 4 bytes: header_len, big-endian unsigned ]
//! [ header_len bytes: header JSON             ]
//! [ N bytes: concatenated object bodies       ]
//! ```
//!
//! The header indexes object bodies by digest, kind, offset, and length.
//! Offsets are measured from the start of the data region; bodies are
//! byte-contiguous in header order, but overlapping ranges are allowed so
//! equivalent prefixes can be deduplicated. Parsing re-hashes every body
//! and rejects the whole pack on any digest mismatch.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use kai_core::{Digest, NodeKind};
use kai_error::{ErrorCode, KaiError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::str::FromStr;

/// Kind tag for raw content blobs in a pack header.
pub const CONTENT_KIND: &str = "content";

/// Header size must stay under 10 MiB.
pub const MAX_HEADER_LEN: usize = 10 * 1024 * 1024;

/// Default cap on the decompressed pack size (100 MiB).
pub const DEFAULT_MAX_PACK_BYTES: usize = 100 * 1024 * 1024;

/// Size limits applied while parsing a pack.
#[derive(Clone, Copy, Debug)]
pub struct PackLimits {
    /// Maximum decompressed size of the whole pack.
    pub max_decompressed: usize,
    /// Maximum header length.
    pub max_header: usize,
}

impl Default for PackLimits {
    fn default() -> Self {
        Self {
            max_decompressed: DEFAULT_MAX_PACK_BYTES,
            max_header: MAX_HEADER_LEN,
        }
    }
}

/// One object to be packed: its declared kind tag and exact body bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackObject {
    /// A node kind name or [`CONTENT_KIND`].
    pub kind: String,
    /// The addressed bytes: `kind \n canonical_json` for nodes, raw
    /// content for blobs.
    pub bytes: Vec<u8>,
}

impl PackObject {
    /// A node object from its raw body bytes.
    #[must_use]
    pub fn node(kind: NodeKind, bytes: Vec<u8>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            bytes,
        }
    }

    /// A content blob object.
    #[must_use]
    pub fn content(bytes: Vec<u8>) -> Self {
        Self {
            kind: CONTENT_KIND.to_string(),
            bytes,
        }
    }

    /// Digest of the body.
    #[must_use]
    pub fn digest(&self) -> Digest {
        Digest::of(&self.bytes)
    }
}

/// Header entry on the wire. Digests are lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackEntry {
    /// Hex digest of the body.
    pub digest: Digest,
    /// Object kind tag.
    pub kind: String,
    /// Offset into the data region.
    pub offset: u64,
    /// Body length.
    pub length: u64,
}

/// The pack header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackHeader {
    /// Indexed objects, in body order.
    pub objects: Vec<PackEntry>,
}

/// A parsed, digest-verified pack.
#[derive(Clone, Debug)]
pub struct ParsedPack {
    /// Verified header entries.
    pub entries: Vec<PackEntry>,
    /// The decompressed data region (object bodies only, no header).
    pub data: Vec<u8>,
}

impl ParsedPack {
    /// Slice one object's body out of the data region.
    #[must_use]
    pub fn body(&self, entry: &PackEntry) -> &[u8] {
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        &self.data[start..end]
    }
}

/// Build a pack from objects. Bodies are laid out contiguously in input
/// order; duplicate digests are collapsed to a single body.
///
/// # Errors
///
/// Fails only when zstd encoding fails.
pub fn build_pack(objects: &[PackObject]) -> Result<Vec<u8>> {
    let mut header = PackHeader::default();
    let mut data: Vec<u8> = Vec::new();
    let mut seen: std::collections::BTreeMap<Digest, (u64, u64)> = std::collections::BTreeMap::new();

    for obj in objects {
        let digest = obj.digest();
        let (offset, length) = match seen.get(&digest) {
            Some(&range) => range,
            None => {
                let offset = data.len() as u64;
                data.extend_from_slice(&obj.bytes);
                let range = (offset, obj.bytes.len() as u64);
                seen.insert(digest, range);
                range
            }
        };
        header.objects.push(PackEntry {
            digest,
            kind: obj.kind.clone(),
            offset,
            length,
        });
    }

    let header_json = serde_json::to_vec(&header)
        .map_err(|e| KaiError::internal("encode pack header").with_source(e))?;
    let header_len = u32::try_from(header_json.len())
        .map_err(|_| KaiError::new(ErrorCode::MalformedPack, "pack header too large"))?;

    let mut plain = Vec::with_capacity(4 + header_json.len() + data.len());
    plain.extend_from_slice(&header_len.to_be_bytes());
    plain.extend_from_slice(&header_json);
    plain.extend_from_slice(&data);

    zstd::encode_all(plain.as_slice(), 0)
        .map_err(|e| KaiError::internal("compress pack").with_source(e))
}

/// Decompress at most `limit` bytes; anything longer rejects the pack.
fn bounded_decompress(compressed: &[u8], limit: usize) -> Result<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::new(compressed)
        .map_err(|e| KaiError::new(ErrorCode::MalformedPack, "not a zstd stream").with_source(e))?;
    let mut out = Vec::new();
    let read = decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| {
            KaiError::new(ErrorCode::MalformedPack, "zstd decompression failed").with_source(e)
        })?;
    if read > limit {
        return Err(KaiError::new(
            ErrorCode::PackTooLarge,
            format!("decompressed pack exceeds {limit} bytes"),
        ));
    }
    Ok(out)
}

/// Parse and verify a compressed pack.
///
/// Validates the frame, the header JSON, every entry's bounds, and every
/// body's digest. Any failure rejects the whole pack.
///
/// # Errors
///
/// - `pack_too_large` when decompressed size or header length exceed the
///   limits,
/// - `malformed_pack` for framing/JSON/bounds problems and unknown kinds,
/// - `digest_mismatch` when any body fails re-hashing.
pub fn parse_pack(compressed: &[u8], limits: &PackLimits) -> Result<ParsedPack> {
    let plain = bounded_decompress(compressed, limits.max_decompressed)?;

    if plain.len() < 4 {
        return Err(KaiError::new(ErrorCode::MalformedPack, "pack shorter than frame header"));
    }
    let header_len = u32::from_be_bytes([plain[0], plain[1], plain[2], plain[3]]) as usize;
    if header_len > limits.max_header {
        return Err(KaiError::new(
            ErrorCode::PackTooLarge,
            format!("pack header exceeds {} bytes", limits.max_header),
        ));
    }
    if plain.len() < 4 + header_len {
        return Err(KaiError::new(ErrorCode::MalformedPack, "truncated pack header"));
    }

    let header: PackHeader = serde_json::from_slice(&plain[4..4 + header_len])
        .map_err(|e| KaiError::new(ErrorCode::MalformedPack, "invalid header JSON").with_source(e))?;
    let data = plain[4 + header_len..].to_vec();
    let data_len = data.len() as u64;

    for (index, entry) in header.objects.iter().enumerate() {
        if entry.kind != CONTENT_KIND && NodeKind::from_str(&entry.kind).is_err() {
            return Err(KaiError::new(
                ErrorCode::MalformedPack,
                format!("unknown object kind: {}", entry.kind),
            )
            .with_context("index", index));
        }
        let end = entry.offset.checked_add(entry.length).ok_or_else(|| {
            KaiError::new(ErrorCode::MalformedPack, "object range overflows")
                .with_context("index", index)
        })?;
        if end > data_len {
            return Err(KaiError::new(
                ErrorCode::MalformedPack,
                "object range outside data region",
            )
            .with_context("index", index));
        }
        let body = &data[entry.offset as usize..end as usize];
        let actual = Digest::of(body);
        if actual != entry.digest {
            return Err(KaiError::new(
                ErrorCode::DigestMismatch,
                "object body does not match declared digest",
            )
            .with_context("index", index)
            .with_context("declared", entry.digest.to_hex())
            .with_context("actual", actual.to_hex()));
        }
    }

    Ok(ParsedPack {
        entries: header.objects,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_core::{node_bytes, NodeKind};
    use serde_json::json;

    fn sample_objects() -> Vec<PackObject> {
        let file_body = node_bytes(
            NodeKind::File,
            &json!({"path": "a.js", "lang": "javascript", "digest": Digest::of(b"x").to_hex(), "size": 1, "createdAt": 0}),
        )
        .unwrap();
        vec![
            PackObject::node(NodeKind::File, file_body),
            PackObject::content(b"const x = 1;".to_vec()),
        ]
    }

    #[test]
    fn roundtrip_preserves_bodies() {
        let objects = sample_objects();
        let pack = build_pack(&objects).unwrap();
        let parsed = parse_pack(&pack, &PackLimits::default()).unwrap();

        assert_eq!(parsed.entries.len(), objects.len());
        for (entry, obj) in parsed.entries.iter().zip(&objects) {
            assert_eq!(entry.digest, obj.digest());
            assert_eq!(entry.kind, obj.kind);
            assert_eq!(parsed.body(entry), obj.bytes.as_slice());
        }
    }

    #[test]
    fn duplicate_objects_share_one_body() {
        let blob = PackObject::content(b"shared".to_vec());
        let pack = build_pack(&[blob.clone(), blob.clone()]).unwrap();
        let parsed = parse_pack(&pack, &PackLimits::default()).unwrap();

        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].offset, parsed.entries[1].offset);
        assert_eq!(parsed.data.len(), b"shared".len());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let pack = build_pack(&sample_objects()).unwrap();
        let mut plain = zstd::decode_all(pack.as_slice()).unwrap();
        // Flip one bit in the last body byte (inside the second object).
        let last = plain.len() - 1;
        plain[last] ^= 0x01;
        let tampered = zstd::encode_all(plain.as_slice(), 0).unwrap();

        let err = parse_pack(&tampered, &PackLimits::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::DigestMismatch);
    }

    #[test]
    fn oversized_pack_is_rejected() {
        let big = PackObject::content(vec![0u8; 4096]);
        let pack = build_pack(&[big]).unwrap();
        let limits = PackLimits {
            max_decompressed: 1024,
            ..PackLimits::default()
        };
        let err = parse_pack(&pack, &limits).unwrap_err();
        assert_eq!(err.code, ErrorCode::PackTooLarge);
    }

    #[test]
    fn header_length_is_bounded() {
        let pack = build_pack(&sample_objects()).unwrap();
        let limits = PackLimits {
            max_header: 8,
            ..PackLimits::default()
        };
        let err = parse_pack(&pack, &limits).unwrap_err();
        assert_eq!(err.code, ErrorCode::PackTooLarge);
    }

    #[test]
    fn out_of_bounds_entry_is_rejected() {
        let header = PackHeader {
            objects: vec![PackEntry {
                digest: Digest::of(b"whatever"),
                kind: CONTENT_KIND.into(),
                offset: 100,
                length: 50,
            }],
        };
        let header_json = serde_json::to_vec(&header).unwrap();
        let mut plain = Vec::new();
        plain.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
        plain.extend_from_slice(&header_json);
        plain.extend_from_slice(b"tiny");
        let pack = zstd::encode_all(plain.as_slice(), 0).unwrap();

        let err = parse_pack(&pack, &PackLimits::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedPack);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let body = b"Blob\n{}".to_vec();
        let entry = PackEntry {
            digest: Digest::of(&body),
            kind: "Blob".into(),
            offset: 0,
            length: body.len() as u64,
        };
        let header_json = serde_json::to_vec(&PackHeader { objects: vec![entry] }).unwrap();
        let mut plain = Vec::new();
        plain.extend_from_slice(&(header_json.len() as u32).to_be_bytes());
        plain.extend_from_slice(&header_json);
        plain.extend_from_slice(&body);
        let pack = zstd::encode_all(plain.as_slice(), 0).unwrap();

        let err = parse_pack(&pack, &PackLimits::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedPack);
    }

    #[test]
    fn garbage_input_is_malformed() {
        let err = parse_pack(b"not a zstd stream", &PackLimits::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedPack);
    }

    #[test]
    fn empty_pack_roundtrips() {
        let pack = build_pack(&[]).unwrap();
        let parsed = parse_pack(&pack, &PackLimits::default()).unwrap();
        assert!(parsed.entries.is_empty());
        assert!(parsed.data.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn any_object_set_roundtrips(bodies in proptest::collection::vec(
            proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256), 0..8)
        ) {
            let objects: Vec<PackObject> =
                bodies.into_iter().map(PackObject::content).collect();
            let pack = build_pack(&objects).unwrap();
            let parsed = parse_pack(&pack, &PackLimits::default()).unwrap();
            proptest::prop_assert_eq!(parsed.entries.len(), objects.len());
            for (entry, obj) in parsed.entries.iter().zip(&objects) {
                proptest::prop_assert_eq!(parsed.body(entry), obj.bytes.as_slice());
            }
        }
    }
}
