// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-sync
//!
//! The client half of the pack-based synchronization protocol: compute
//! the push closure, negotiate missing objects, ship packs, batch-update
//! refs, and fetch remote ref targets into namespaced local refs.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod closure;
pub mod proto;

pub use client::RemoteClient;
pub use closure::{PUSH_EDGE_TYPES, SyncObject, reachable_objects};

use kai_core::{Digest, RefUpdate, RefUpdateResult, parse_node_bytes};
use kai_error::{ErrorCode, KaiError, Result};
use kai_pack::{PackObject, build_pack};
use kai_refs::RefRegistry;
use kai_store::GraphStore;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Pushes at or below this object count may skip negotiation and rely on
/// server-side dedup.
pub const NEGOTIATE_THRESHOLD: usize = 100;

/// Outcome of a push.
#[derive(Clone, Debug)]
pub struct PushReport {
    /// Objects sent in the pack (after negotiation).
    pub pushed_objects: usize,
    /// Objects the server already had.
    pub skipped_objects: usize,
    /// Per-ref update results.
    pub results: Vec<RefUpdateResult>,
}

/// Outcome of a fetch.
#[derive(Clone, Debug, Default)]
pub struct FetchReport {
    /// Refs examined.
    pub refs_seen: usize,
    /// Node objects fetched and inserted.
    pub objects_fetched: usize,
    /// Namespaced local refs updated.
    pub refs_updated: usize,
}

/// Push local refs to the server.
///
/// For each named local ref: compute the closure of its target, negotiate
/// (above [`NEGOTIATE_THRESHOLD`] objects), send one pack with everything
/// missing, then issue a single batch ref update carrying
/// `(name, old_remote, new_local)` pairs.
///
/// # Errors
///
/// `ref_not_found` for unknown local refs; pack rejections and transport
/// failures propagate. Per-ref fast-forward failures are reported in the
/// result list, not as an error.
pub async fn push(
    store: &GraphStore,
    client: &RemoteClient,
    ref_names: &[&str],
) -> Result<PushReport> {
    let refs = RefRegistry::new(store);

    let mut objects: Vec<SyncObject> = Vec::new();
    let mut seen: BTreeSet<Digest> = BTreeSet::new();
    let mut updates: Vec<RefUpdate> = Vec::new();

    for name in ref_names {
        let local = refs
            .get(name)?
            .ok_or_else(|| KaiError::ref_not_found(name))?;
        let remote = client.get_ref(name).await?;

        for obj in reachable_objects(store, &local.target)? {
            if seen.insert(obj.digest) {
                objects.push(obj);
            }
        }
        updates.push(RefUpdate {
            name: (*name).to_string(),
            old: remote.map(|r| r.target),
            new: local.target,
            force: false,
        });
    }

    let total = objects.len();
    let to_send: Vec<&SyncObject> = if total > NEGOTIATE_THRESHOLD {
        let digests: Vec<Digest> = objects.iter().map(|o| o.digest).collect();
        let missing: BTreeSet<Digest> = client.negotiate(&digests).await?.into_iter().collect();
        objects.iter().filter(|o| missing.contains(&o.digest)).collect()
    } else {
        objects.iter().collect()
    };
    debug!(total, sending = to_send.len(), "push closure negotiated");

    if !to_send.is_empty() {
        let pack_objects: Vec<PackObject> = to_send
            .iter()
            .map(|o| PackObject {
                kind: o.kind.clone(),
                bytes: o.bytes.clone(),
            })
            .collect();
        let pack = build_pack(&pack_objects)?;
        let receipt = client.send_pack(pack).await?;
        debug!(segment = receipt.segment_id, indexed = receipt.indexed, "pack ingested");
    }

    let response = client.batch_update(updates).await?;
    info!(
        push_id = %response.push_id,
        refs = response.results.len(),
        pushed = to_send.len(),
        "push complete"
    );

    Ok(PushReport {
        pushed_objects: to_send.len(),
        skipped_objects: total - to_send.len(),
        results: response.results,
    })
}

/// Fetch remote refs matching `prefix` into `remote/<remote_name>/<ref>`.
///
/// For each remote ref whose target object is absent locally, fetches the
/// raw bytes, re-verifies the digest, parses the `kind\npayload` framing,
/// and inserts the node.
///
/// # Errors
///
/// `digest_mismatch` when a fetched body fails verification,
/// `malformed_pack` when its framing cannot be parsed.
pub async fn fetch(
    store: &GraphStore,
    client: &RemoteClient,
    remote_name: &str,
    prefix: Option<&str>,
) -> Result<FetchReport> {
    let refs = RefRegistry::new(store);
    let mut report = FetchReport::default();

    for info in client.list_refs(prefix).await? {
        report.refs_seen += 1;

        if !store.has_node(&info.target)? {
            let (_, bytes) = client.get_object(&info.target).await?;
            let (kind, payload) = parse_node_bytes(&bytes).ok_or_else(|| {
                KaiError::new(ErrorCode::MalformedPack, "fetched object has invalid framing")
            })?;
            let put = store.put_node(kind, &payload, info.updated_at)?;
            if put.id != info.target {
                return Err(KaiError::new(
                    ErrorCode::DigestMismatch,
                    "fetched node does not address to the ref target",
                ));
            }
            report.objects_fetched += 1;
        }

        let local_name = format!("remote/{remote_name}/{}", info.name);
        refs.force_set(
            &local_name,
            &info.target,
            info.actor.as_deref().unwrap_or("remote"),
            "",
            info.updated_at,
        )?;
        report.refs_updated += 1;
    }

    info!(
        remote = remote_name,
        refs = report.refs_updated,
        fetched = report.objects_fetched,
        "fetch complete"
    );
    Ok(report)
}
