// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reachability closure for pushes.
//!
//! Starting from a ref target, follows `HAS_FILE`, `DEFINES_IN`,
//! `MODIFIES`, `HAS`, `AFFECTS`, and `CONTAINS` edges (both outbound and
//! context-scoped) and picks up the content blob behind every File node.

use kai_core::{Digest, EdgeType, NodeKind};
use kai_error::{KaiError, Result};
use kai_store::GraphStore;
use std::collections::BTreeSet;

/// Edge types a push closure follows.
pub const PUSH_EDGE_TYPES: [EdgeType; 6] = [
    EdgeType::HasFile,
    EdgeType::DefinesIn,
    EdgeType::Modifies,
    EdgeType::Has,
    EdgeType::Affects,
    EdgeType::Contains,
];

/// One transferable object: a node body or a content blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncObject {
    /// Object digest (node id, or blake3 of the blob).
    pub digest: Digest,
    /// Kind tag: a node kind name or `"content"`.
    pub kind: String,
    /// The exact addressed bytes.
    pub bytes: Vec<u8>,
}

/// Compute every object reachable from `root`, including `root` itself.
///
/// # Errors
///
/// `node_not_found` when the root is not stored locally; storage failures
/// propagate.
pub fn reachable_objects(store: &GraphStore, root: &Digest) -> Result<Vec<SyncObject>> {
    let mut visited: BTreeSet<Digest> = BTreeSet::new();
    let mut queue = vec![*root];
    let mut out = Vec::new();

    while let Some(id) = queue.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = store.node(&id)? else {
            if id == *root {
                return Err(KaiError::node_not_found(root));
            }
            continue;
        };
        let bytes = store
            .raw_node_bytes(&id)?
            .ok_or_else(|| KaiError::node_not_found(&id))?;
        out.push(SyncObject {
            digest: id,
            kind: node.kind.as_str().to_string(),
            bytes,
        });

        // File nodes carry their content blob along.
        if node.kind == NodeKind::File {
            if let Some(hex) = node.payload.get("digest").and_then(|v| v.as_str()) {
                if let Ok(content_digest) = Digest::from_hex(hex) {
                    if visited.insert(content_digest) {
                        if let Some(blob) = store.object_bytes(&content_digest)? {
                            out.push(SyncObject {
                                digest: content_digest,
                                kind: kai_pack::CONTENT_KIND.to_string(),
                                bytes: blob,
                            });
                        }
                    }
                }
            }
        }

        for edge_type in PUSH_EDGE_TYPES {
            for edge in store.edges_from(&id, Some(edge_type))? {
                queue.push(edge.dst);
            }
            for edge in store.edges_at(&id, Some(edge_type))? {
                queue.push(edge.src);
                queue.push(edge.dst);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_core::{Edge, NodeKind};
    use kai_store::StoreProfile;
    use serde_json::json;

    #[test]
    fn closure_includes_files_blobs_and_scoped_symbols() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = GraphStore::init_repo(dir.path()).unwrap();

        let blob = store.write_object(b"content!").unwrap();
        let file = store
            .put_node(
                NodeKind::File,
                &json!({"path": "a.js", "lang": "javascript", "digest": blob.to_hex(), "size": 8, "createdAt": 0}),
                0,
            )
            .unwrap();
        let snap = store
            .put_node(
                NodeKind::Snapshot,
                &json!({"sourceType": "mem", "sourceRef": "", "fileCount": 1, "files": [], "createdAt": 0}),
                0,
            )
            .unwrap();
        let symbol = store
            .put_node(NodeKind::Symbol, &json!({"name": "a", "snapshotId": snap.id.to_hex()}), 0)
            .unwrap();

        store
            .put_edge(&Edge::new(snap.id, EdgeType::HasFile, file.id), 0)
            .unwrap();
        store
            .put_edge(
                &Edge::scoped(symbol.id, EdgeType::DefinesIn, file.id, snap.id),
                0,
            )
            .unwrap();

        let objects = reachable_objects(&store, &snap.id).unwrap();
        let digests: BTreeSet<Digest> = objects.iter().map(|o| o.digest).collect();
        assert!(digests.contains(&snap.id));
        assert!(digests.contains(&file.id));
        assert!(digests.contains(&symbol.id), "scoped edge pulls the symbol in");
        assert!(digests.contains(&blob), "file content blob travels along");

        // Every node body re-hashes to its digest.
        for obj in &objects {
            assert_eq!(Digest::of(&obj.bytes), obj.digest);
        }
    }

    #[test]
    fn missing_root_is_an_error() {
        let store = GraphStore::open_in_memory(StoreProfile::Client).unwrap();
        let err = reachable_objects(&store, &Digest::of(b"nope")).unwrap_err();
        assert_eq!(err.code, kai_error::ErrorCode::NodeNotFound);
    }
}
