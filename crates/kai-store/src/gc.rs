// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mark-and-sweep garbage collection.
//!
//! Roots are every non-ephemeral ref target, every Workspace node (with its
//! base, head, and open changesets), every Review node (with its reviewed
//! changeset), and the caller-supplied `keep` list. The mark phase walks
//! outgoing edges, context-scoped edges, and the digest fields embedded in
//! payloads, including `MODIFIES` targets, so evidence symbols stay live
//! while an open changeset cites them. Content blobs referenced by live
//! File nodes and snapshot manifests survive; everything else is swept.

use crate::db_err;
use crate::store::{GraphStore, StoreTx, sql};
use kai_core::{
    Digest, NodeKind, SnapshotPayload, WorkspacePayload, is_ephemeral_ref,
};
use kai_error::Result;
use rusqlite::params;
use std::collections::{BTreeSet, VecDeque};
use tracing::info;

/// Outcome of one collection run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Nodes that survived the mark phase.
    pub live_nodes: usize,
    /// Nodes deleted.
    pub nodes_removed: usize,
    /// Edges deleted because an endpoint or context died.
    pub edges_removed: usize,
    /// Loose content blobs deleted.
    pub blobs_removed: usize,
}

/// Run a full mark-and-sweep pass.
///
/// # Errors
///
/// Database or filesystem failures abort the sweep; the mark phase itself
/// never mutates.
pub fn collect(store: &GraphStore, keep: &[Digest]) -> Result<GcReport> {
    let (marked, live_blobs) = mark(store, keep)?;

    let (nodes_removed, edges_removed) = store.with_tx(|tx| sweep(tx, &marked))?;

    let mut blobs_removed = 0;
    if let Some(dir) = store.objects_dir() {
        if dir.is_dir() {
            let entries = std::fs::read_dir(dir)
                .map_err(|e| kai_error::KaiError::internal("list objects dir").with_source(e))?;
            for entry in entries {
                let entry = entry
                    .map_err(|e| kai_error::KaiError::internal("read objects dir").with_source(e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !live_blobs.contains(&name) {
                    std::fs::remove_file(entry.path()).map_err(|e| {
                        kai_error::KaiError::internal("remove dead blob").with_source(e)
                    })?;
                    blobs_removed += 1;
                }
            }
        }
    }

    let report = GcReport {
        live_nodes: marked.len(),
        nodes_removed,
        edges_removed,
        blobs_removed,
    };
    info!(
        live = report.live_nodes,
        removed = report.nodes_removed,
        blobs = report.blobs_removed,
        "gc complete"
    );
    Ok(report)
}

/// Compute the live node set and the hex names of live content blobs.
fn mark(store: &GraphStore, keep: &[Digest]) -> Result<(BTreeSet<Digest>, BTreeSet<String>)> {
    let mut queue: VecDeque<Digest> = keep.iter().copied().collect();

    for entry in store.ref_list(None)? {
        if !is_ephemeral_ref(&entry.name) {
            queue.push_back(entry.target);
        }
    }
    for kind in [NodeKind::Workspace, NodeKind::Review] {
        for node in store.nodes_by_kind(kind)? {
            queue.push_back(node.id);
        }
    }

    let mut marked = BTreeSet::new();
    let mut live_blobs = BTreeSet::new();

    while let Some(id) = queue.pop_front() {
        if !marked.insert(id) {
            continue;
        }
        let Some(node) = store.node(&id)? else {
            continue;
        };

        match node.kind {
            NodeKind::Workspace => {
                if let Ok(ws) = serde_json::from_value::<WorkspacePayload>(node.payload.clone()) {
                    push_hex(&mut queue, &ws.base_snapshot);
                    push_hex(&mut queue, &ws.head_snapshot);
                    for cs in &ws.open_change_sets {
                        push_hex(&mut queue, cs);
                    }
                }
            }
            NodeKind::Snapshot => {
                if let Ok(snap) = serde_json::from_value::<SnapshotPayload>(node.payload.clone()) {
                    for file in &snap.files {
                        push_hex(&mut queue, &file.digest);
                        live_blobs.insert(file.content_digest.clone());
                    }
                }
            }
            NodeKind::File => {
                if let Some(digest) = node.payload.get("digest").and_then(|v| v.as_str()) {
                    live_blobs.insert(digest.to_string());
                }
            }
            NodeKind::ChangeSet => {
                for key in ["base", "head"] {
                    if let Some(hex) = node.payload.get(key).and_then(|v| v.as_str()) {
                        push_hex(&mut queue, hex);
                    }
                }
            }
            NodeKind::Review => {
                if let Some(hex) = node.payload.get("changeSet").and_then(|v| v.as_str()) {
                    push_hex(&mut queue, hex);
                }
            }
            NodeKind::ChangeType => {
                if let Some(symbols) = node
                    .payload
                    .pointer("/evidence/symbols")
                    .and_then(|v| v.as_array())
                {
                    for sym in symbols {
                        if let Some(hex) = sym.as_str() {
                            push_hex(&mut queue, hex);
                        }
                    }
                }
            }
            _ => {}
        }

        for edge in store.edges_from(&id, None)? {
            queue.push_back(edge.dst);
        }
        for edge in store.edges_at(&id, None)? {
            queue.push_back(edge.src);
            queue.push_back(edge.dst);
        }
    }

    Ok((marked, live_blobs))
}

fn push_hex(queue: &mut VecDeque<Digest>, hex: &str) {
    if let Ok(digest) = Digest::from_hex(hex) {
        queue.push_back(digest);
    }
}

/// Delete everything outside the marked set. Returns
/// `(nodes_removed, edges_removed)`.
fn sweep(tx: &StoreTx<'_>, marked: &BTreeSet<Digest>) -> Result<(usize, usize)> {
    let conn = tx.connection();
    let all = sql::all_node_ids(conn)?;
    let mut nodes_removed = 0;
    let mut edges_removed = 0;
    for id in all {
        if marked.contains(&id) {
            continue;
        }
        let bytes = id.as_bytes().as_slice();
        edges_removed += conn
            .execute(
                "DELETE FROM edges WHERE src = ?1 OR dst = ?1 OR at = ?1",
                params![bytes],
            )
            .map_err(db_err)?;
        conn.execute("DELETE FROM slugs WHERE target_id = ?1", params![bytes])
            .map_err(db_err)?;
        conn.execute("DELETE FROM logs WHERE id = ?1", params![bytes])
            .map_err(db_err)?;
        nodes_removed += conn
            .execute("DELETE FROM nodes WHERE id = ?1", params![bytes])
            .map_err(db_err)?;
    }
    Ok((nodes_removed, edges_removed))
}
