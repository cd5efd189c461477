// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server-side pack ingest.
//!
//! A verified pack becomes one `segments` row (the compressed data
//! region), one `objects` row per entry, `node_publish` chain entries for
//! node objects, and `enrich_queue` rows for Snapshot and ChangeSet
//! objects, all inside one transaction. Ingest is all-or-nothing.

use kai_core::Digest;
use kai_error::{KaiError, Result};
use kai_pack::{CONTENT_KIND, PackLimits, parse_pack};
use kai_store::GraphStore;
use tracing::info;

/// Result of one successful ingest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestReceipt {
    /// Row id of the stored segment.
    pub segment_id: i64,
    /// Number of objects newly indexed (duplicates skipped).
    pub indexed: usize,
}

/// Parse, verify, and store a compressed pack.
///
/// # Errors
///
/// `malformed_pack` / `pack_too_large` / `digest_mismatch` reject the
/// whole pack before anything is written; storage failures roll the
/// transaction back.
pub fn ingest_pack(
    store: &GraphStore,
    compressed: &[u8],
    actor: &str,
    limits: &PackLimits,
    now: i64,
) -> Result<IngestReceipt> {
    let parsed = parse_pack(compressed, limits)?;
    let checksum = Digest::of(&parsed.data);
    let blob = zstd::encode_all(parsed.data.as_slice(), 0)
        .map_err(|e| KaiError::internal("compress segment").with_source(e))?;

    let receipt = store.with_tx(|tx| {
        let segment_id = tx.segment_insert(now, &checksum, parsed.data.len() as u64, &blob)?;
        let mut indexed = 0;
        for entry in &parsed.entries {
            let inserted = tx.object_index_put(
                &entry.digest,
                segment_id,
                entry.offset,
                entry.length,
                &entry.kind,
                now,
            )?;
            if !inserted {
                continue;
            }
            indexed += 1;
            if entry.kind != CONTENT_KIND {
                tx.publish_append(&entry.digest, &entry.kind, actor, now)?;
            }
            if entry.kind == "Snapshot" || entry.kind == "ChangeSet" {
                tx.enrich_enqueue(&entry.digest, &entry.kind, now)?;
            }
        }
        Ok(IngestReceipt {
            segment_id,
            indexed,
        })
    })?;

    info!(
        actor,
        segment = receipt.segment_id,
        objects = parsed.entries.len(),
        indexed = receipt.indexed,
        "pack ingested"
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_core::{NodeKind, node_bytes};
    use kai_pack::{PackObject, build_pack};
    use kai_store::StoreProfile;
    use serde_json::json;

    fn server_store() -> GraphStore {
        GraphStore::open_in_memory(StoreProfile::Server).unwrap()
    }

    fn sample_pack() -> (Vec<u8>, Vec<Digest>) {
        let snap_body = node_bytes(
            NodeKind::Snapshot,
            &json!({"sourceType": "mem", "sourceRef": "", "fileCount": 0, "files": [], "createdAt": 0}),
        )
        .unwrap();
        let objects = vec![
            PackObject::node(NodeKind::Snapshot, snap_body),
            PackObject::content(b"const x = 1;".to_vec()),
        ];
        let digests = objects.iter().map(PackObject::digest).collect();
        (build_pack(&objects).unwrap(), digests)
    }

    #[test]
    fn ingest_stores_and_indexes_everything() {
        let store = server_store();
        let (pack, digests) = sample_pack();

        let receipt = ingest_pack(&store, &pack, "alice", &PackLimits::default(), 7).unwrap();
        assert_eq!(receipt.indexed, 2);

        for digest in &digests {
            assert!(store.has_object(digest).unwrap());
        }
        let (kind, bytes) = store.segment_object_bytes(&digests[0]).unwrap().unwrap();
        assert_eq!(kind, "Snapshot");
        assert_eq!(Digest::of(&bytes), digests[0]);
    }

    #[test]
    fn ingest_is_idempotent_on_digest() {
        let store = server_store();
        let (pack, _) = sample_pack();

        let first = ingest_pack(&store, &pack, "a", &PackLimits::default(), 1).unwrap();
        let second = ingest_pack(&store, &pack, "a", &PackLimits::default(), 2).unwrap();
        assert_eq!(first.indexed, 2);
        assert_eq!(second.indexed, 0);
        assert_ne!(first.segment_id, second.segment_id);
    }

    #[test]
    fn tampered_pack_leaves_no_rows() {
        let store = server_store();
        let (pack, digests) = sample_pack();

        let mut plain = zstd::decode_all(pack.as_slice()).unwrap();
        let last = plain.len() - 1;
        plain[last] ^= 0x01;
        let tampered = zstd::encode_all(plain.as_slice(), 0).unwrap();

        let err = ingest_pack(&store, &tampered, "a", &PackLimits::default(), 1).unwrap_err();
        assert_eq!(err.code, kai_error::ErrorCode::DigestMismatch);

        // No partial insert: not even the intact first object landed.
        assert!(!store.has_object(&digests[0]).unwrap());
    }

    #[test]
    fn snapshot_ingest_queues_enrichment() {
        let store = server_store();
        let (pack, _) = sample_pack();
        ingest_pack(&store, &pack, "a", &PackLimits::default(), 1).unwrap();

        let task = store.with_tx(|tx| tx.enrich_claim(2)).unwrap().unwrap();
        assert_eq!(task.kind, "Snapshot");
    }
}
