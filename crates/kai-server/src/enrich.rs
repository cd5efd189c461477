// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background enrichment worker.
//!
//! Polls every open repository's queue, claims one task at a time
//! (`pending → processing` inside a single transaction), runs the
//! kind-specific job, and records `done` or `failed` with a captured
//! error. Failures never touch the synchronous ingest path.
//!
//! Jobs:
//! - **Snapshot**: materialise the Snapshot and File nodes out of the
//!   object store and extract Symbol nodes with snapshot-scoped
//!   `DEFINES_IN` edges.
//! - **ChangeSet**: materialise the node and render its intent text.

use crate::registry::RepoRegistry;
use kai_change::IntentGenerator;
use kai_core::{
    Digest, Edge, EdgeType, NodeKind, SnapshotPayload, SymbolPayload, parse_node_bytes,
};
use kai_error::{KaiError, Result};
use kai_snapshot::SymbolExtractor;
use kai_store::{EnrichTask, GraphStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capabilities the worker runs jobs with.
pub struct EnrichmentJobs {
    /// Symbol extraction for Snapshot jobs.
    pub extractor: Arc<dyn SymbolExtractor>,
    /// Intent rendering for ChangeSet jobs.
    pub intent: Arc<dyn IntentGenerator>,
}

/// Spawn the worker loop. It runs until the process exits.
pub fn spawn_worker(
    registry: Arc<RepoRegistry>,
    jobs: Arc<EnrichmentJobs>,
    poll_interval: Duration,
    now_fn: fn() -> i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_interval).await;
            for handle in registry.open_handles() {
                let jobs = Arc::clone(&jobs);
                let result = tokio::task::spawn_blocking(move || {
                    process_one(handle.store(), &jobs, now_fn())
                })
                .await;
                match result {
                    Ok(Ok(Some(task))) => {
                        debug!(task = task.id, kind = %task.kind, "enrichment task processed");
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(err)) => warn!(error = %err, "enrichment poll failed"),
                    Err(err) => warn!(error = %err, "enrichment task panicked"),
                }
            }
        }
    })
}

/// Claim and run at most one task. Returns the claimed task, if any.
///
/// # Errors
///
/// Claim/record-keeping failures only; job failures are captured in the
/// queue row.
pub fn process_one(
    store: &GraphStore,
    jobs: &EnrichmentJobs,
    now: i64,
) -> Result<Option<EnrichTask>> {
    let Some(task) = store.with_tx(|tx| tx.enrich_claim(now))? else {
        return Ok(None);
    };

    let outcome = run_job(store, jobs, &task, now);
    match outcome {
        Ok(()) => store.with_tx(|tx| tx.enrich_done(task.id, now))?,
        Err(err) => {
            warn!(task = task.id, error = %err, "enrichment job failed");
            store.with_tx(|tx| tx.enrich_failed(task.id, now, &err.to_string()))?;
        }
    }
    Ok(Some(task))
}

fn run_job(store: &GraphStore, jobs: &EnrichmentJobs, task: &EnrichTask, now: i64) -> Result<()> {
    match task.kind.as_str() {
        "Snapshot" => enrich_snapshot(store, jobs.extractor.as_ref(), &task.node_id, now),
        "ChangeSet" => enrich_changeset(store, jobs.intent.as_ref(), &task.node_id),
        other => Err(KaiError::internal(format!("no enrichment job for kind {other}"))),
    }
}

/// Materialise one node object out of the segment store into the graph
/// tables, verifying that it re-addresses to its digest.
fn materialize_node(store: &GraphStore, digest: &Digest, now: i64) -> Result<Option<NodeKind>> {
    let Some((_, bytes)) = store.segment_object_bytes(digest)? else {
        return Ok(None);
    };
    let Some((kind, payload)) = parse_node_bytes(&bytes) else {
        return Err(KaiError::new(
            kai_error::ErrorCode::MalformedPack,
            "stored object has invalid node framing",
        ));
    };
    let put = store.put_node(kind, &payload, now)?;
    if put.id != *digest {
        return Err(KaiError::new(
            kai_error::ErrorCode::DigestMismatch,
            "stored object does not address to its digest",
        ));
    }
    Ok(Some(kind))
}

fn enrich_snapshot(
    store: &GraphStore,
    extractor: &dyn SymbolExtractor,
    snapshot_id: &Digest,
    now: i64,
) -> Result<()> {
    if materialize_node(store, snapshot_id, now)?.is_none() {
        return Err(KaiError::object_not_found(snapshot_id));
    }
    let node = store
        .node(snapshot_id)?
        .ok_or_else(|| KaiError::node_not_found(snapshot_id))?;
    let snapshot: SnapshotPayload = serde_json::from_value(node.payload)
        .map_err(|e| KaiError::internal("stored snapshot payload malformed").with_source(e))?;

    let mut symbols = 0usize;
    for entry in &snapshot.files {
        let file_id = match Digest::from_hex(&entry.digest) {
            Ok(d) => d,
            Err(_) => continue,
        };
        if materialize_node(store, &file_id, now)?.is_none() {
            continue;
        }
        store.put_edge(&Edge::new(*snapshot_id, EdgeType::HasFile, file_id), now)?;

        if entry.lang.is_empty() {
            continue;
        }
        let Ok(content_digest) = Digest::from_hex(&entry.content_digest) else {
            continue;
        };
        let Some(content) = store.object_bytes(&content_digest)? else {
            continue;
        };
        for raw in extractor.extract(&entry.lang, &content) {
            let payload = SymbolPayload {
                name: raw.name,
                kind: raw.kind,
                file: entry.path.clone(),
                range: raw.range,
                signature: raw.signature,
                snapshot_id: snapshot_id.to_hex(),
            };
            let put = store.put_node(NodeKind::Symbol, &payload.to_value(), now)?;
            store.put_edge(
                &Edge::scoped(put.id, EdgeType::DefinesIn, file_id, *snapshot_id),
                now,
            )?;
            symbols += 1;
        }
    }

    info!(snapshot = %snapshot_id.short(), symbols, "snapshot enriched");
    Ok(())
}

fn enrich_changeset(
    store: &GraphStore,
    intent: &dyn IntentGenerator,
    changeset_id: &Digest,
) -> Result<()> {
    if materialize_node(store, changeset_id, 0)?.is_none() {
        return Err(KaiError::object_not_found(changeset_id));
    }
    let rendered = intent.render(store, changeset_id, None, false)?;
    info!(changeset = %changeset_id.short(), intent = %rendered, "changeset intent rendered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_pack;
    use kai_change::TemplateIntentGenerator;
    use kai_core::node_bytes;
    use kai_pack::{PackLimits, PackObject, build_pack};
    use kai_snapshot::SimpleFunctionExtractor;
    use kai_store::StoreProfile;
    use serde_json::json;

    fn jobs() -> EnrichmentJobs {
        EnrichmentJobs {
            extractor: Arc::new(SimpleFunctionExtractor),
            intent: Arc::new(TemplateIntentGenerator),
        }
    }

    #[test]
    fn snapshot_job_materialises_and_extracts() {
        let store = GraphStore::open_in_memory(StoreProfile::Server).unwrap();

        let content = b"function login(u) {\n  return u;\n}\n".to_vec();
        let content_digest = Digest::of(&content);
        let file_payload = json!({
            "path": "auth.js", "lang": "javascript",
            "digest": content_digest.to_hex(), "size": content.len(), "createdAt": 0,
        });
        let file_bytes = node_bytes(NodeKind::File, &file_payload).unwrap();
        let file_id = Digest::of(&file_bytes);
        let snap_payload = json!({
            "sourceType": "mem", "sourceRef": "", "fileCount": 1,
            "files": [{"path": "auth.js", "lang": "javascript",
                       "digest": file_id.to_hex(), "contentDigest": content_digest.to_hex()}],
            "createdAt": 0,
        });
        let snap_bytes = node_bytes(NodeKind::Snapshot, &snap_payload).unwrap();
        let snap_id = Digest::of(&snap_bytes);

        let pack = build_pack(&[
            PackObject::node(NodeKind::Snapshot, snap_bytes),
            PackObject::node(NodeKind::File, file_bytes),
            PackObject::content(content),
        ])
        .unwrap();
        ingest_pack(&store, &pack, "a", &PackLimits::default(), 1).unwrap();

        let task = process_one(&store, &jobs(), 2).unwrap().unwrap();
        assert_eq!(task.kind, "Snapshot");
        assert_eq!(task.node_id, snap_id);

        // The snapshot and file nodes are materialised; symbols extracted.
        assert!(store.has_node(&snap_id).unwrap());
        assert!(store.has_node(&file_id).unwrap());
        let scoped = store.edges_at(&snap_id, Some(EdgeType::DefinesIn)).unwrap();
        assert_eq!(scoped.len(), 1);

        // Queue drained.
        assert!(process_one(&store, &jobs(), 3).unwrap().is_none());
    }

    #[test]
    fn failed_jobs_record_the_error() {
        let store = GraphStore::open_in_memory(StoreProfile::Server).unwrap();
        // Queue a task whose object was never ingested.
        store
            .with_tx(|tx| tx.enrich_enqueue(&Digest::of(b"ghost"), "Snapshot", 1))
            .unwrap();

        let task = process_one(&store, &jobs(), 2).unwrap().unwrap();
        assert_eq!(task.kind, "Snapshot");

        // The failure is captured in the row, and nothing is pending.
        assert!(process_one(&store, &jobs(), 3).unwrap().is_none());
    }
}
