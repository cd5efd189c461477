// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-refs
//!
//! Named refs with fast-forward discipline. Every successful update on a
//! server store appends one hash-chained entry to the append-only
//! `ref_history` table; client stores keep refs only (the history tables
//! are a server concern).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use kai_core::{
    Digest, HistoryEntry, NodeKind, RefEntry, RefUpdate, RefUpdateResult, ref_name_valid,
};
use kai_error::{ErrorCode, KaiError, Result};
use kai_store::{GraphStore, StoreProfile, StoreTx};
use serde_json::{Value, json};
use std::str::FromStr;
use tracing::info;

/// Default page size for history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
/// Hard cap on history page size.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Ref registry over a [`GraphStore`].
pub struct RefRegistry<'a> {
    store: &'a GraphStore,
}

impl<'a> RefRegistry<'a> {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    fn records_history(&self) -> bool {
        self.store.profile() == StoreProfile::Server
    }

    /// Look up a ref by name.
    ///
    /// # Errors
    ///
    /// Database failures only; an absent ref is `Ok(None)`.
    pub fn get(&self, name: &str) -> Result<Option<RefEntry>> {
        self.store.ref_get(name)
    }

    /// List refs, optionally by prefix, sorted by name.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn list(&self, prefix: Option<&str>) -> Result<Vec<RefEntry>> {
        self.store.ref_list(prefix)
    }

    /// Fast-forward update.
    ///
    /// With `expected_old = None` the ref must not exist yet; otherwise the
    /// current target must equal `expected_old` byte-for-byte. On success
    /// the ref is upserted and (server-side) one history entry is appended
    /// whose parent is the previous entry for the same ref.
    ///
    /// # Errors
    ///
    /// `ref_mismatch` when the precondition fails; nothing is written.
    pub fn set_fast_forward(
        &self,
        name: &str,
        expected_old: Option<&Digest>,
        new: &Digest,
        actor: &str,
        push_id: &str,
        now: i64,
    ) -> Result<RefEntry> {
        self.validate_name(name)?;
        self.store.with_tx(|tx| {
            apply_update(
                tx,
                self.records_history(),
                name,
                expected_old,
                new,
                false,
                actor,
                push_id,
                now,
            )
        })
    }

    /// Force update: bypasses the equality check but still appends history
    /// with a `force: true` marker, continuing the existing chain.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn force_set(
        &self,
        name: &str,
        new: &Digest,
        actor: &str,
        push_id: &str,
        now: i64,
    ) -> Result<RefEntry> {
        self.validate_name(name)?;
        self.store.with_tx(|tx| {
            apply_update(tx, self.records_history(), name, None, new, true, actor, push_id, now)
        })
    }

    /// Delete a ref. Returns `true` when it existed.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn delete(&self, name: &str) -> Result<bool> {
        self.store.with_tx(|tx| tx.ref_delete(name))
    }

    /// Apply a batch of updates inside a single transaction.
    ///
    /// Per-entry fast-forward failures are reported in the result list
    /// without aborting the batch; infrastructure errors abort and roll
    /// back everything (the batch is atomic).
    ///
    /// # Errors
    ///
    /// Only infrastructure failures; precondition failures come back as
    /// per-entry results.
    pub fn batch_update(
        &self,
        updates: &[RefUpdate],
        actor: &str,
        push_id: &str,
        now: i64,
    ) -> Result<Vec<RefUpdateResult>> {
        let records_history = self.records_history();
        let results = self.store.with_tx(|tx| {
            let mut results = Vec::with_capacity(updates.len());
            for update in updates {
                if !ref_name_valid(&update.name) {
                    results.push(RefUpdateResult {
                        name: update.name.clone(),
                        ok: false,
                        error: Some(ErrorCode::InvalidRefName.as_str().to_string()),
                        updated_at: None,
                    });
                    continue;
                }
                let outcome = apply_update(
                    tx,
                    records_history,
                    &update.name,
                    update.old.as_ref(),
                    &update.new,
                    update.force,
                    actor,
                    push_id,
                    now,
                );
                match outcome {
                    Ok(entry) => results.push(RefUpdateResult {
                        name: update.name.clone(),
                        ok: true,
                        error: None,
                        updated_at: Some(entry.updated_at),
                    }),
                    Err(err) if err.code == ErrorCode::RefMismatch => {
                        results.push(RefUpdateResult {
                            name: update.name.clone(),
                            ok: false,
                            error: Some(err.code.as_str().to_string()),
                            updated_at: None,
                        });
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(results)
        })?;
        info!(
            push_id,
            total = results.len(),
            applied = results.iter().filter(|r| r.ok).count(),
            "batch ref update"
        );
        Ok(results)
    }

    /// Id of the globally latest history entry.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn head(&self) -> Result<Option<Digest>> {
        self.store.history_head()
    }

    /// History entries strictly after `after_seq`, ascending by `seq`,
    /// capped at `limit` (default 100, max 1000).
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn entries(
        &self,
        ref_filter: Option<&str>,
        after_seq: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
        self.store
            .history_entries(ref_filter, after_seq.unwrap_or(0), limit)
    }

    /// Verify the per-ref hash chain: every entry's id recomputes, and
    /// every parent matches the preceding entry.
    ///
    /// # Errors
    ///
    /// Database failures only; a broken chain is `Ok(false)`.
    pub fn verify_chain(&self, name: &str) -> Result<bool> {
        let entries = self
            .store
            .history_entries(Some(name), 0, MAX_HISTORY_LIMIT)?;
        let mut prev: Option<Digest> = None;
        for entry in &entries {
            if entry.parent != prev {
                return Ok(false);
            }
            match entry.verify_id() {
                Ok(true) => {}
                _ => return Ok(false),
            }
            prev = Some(entry.id);
        }
        Ok(true)
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if ref_name_valid(name) {
            Ok(())
        } else {
            Err(KaiError::new(
                ErrorCode::InvalidRefName,
                format!("invalid ref name: {name:?}"),
            ))
        }
    }
}

/// Shared update path for single and batch updates. Runs inside the
/// caller's transaction.
#[allow(clippy::too_many_arguments)]
fn apply_update(
    tx: &StoreTx<'_>,
    records_history: bool,
    name: &str,
    expected_old: Option<&Digest>,
    new: &Digest,
    force: bool,
    actor: &str,
    push_id: &str,
    now: i64,
) -> Result<RefEntry> {
    let current = tx.ref_get(name)?;
    let current_target = current.as_ref().map(|r| r.target);

    if !force {
        match (expected_old, current_target.as_ref()) {
            (None, None) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            _ => {
                return Err(KaiError::ref_mismatch(name)
                    .with_context("expected", expected_old.map(Digest::to_hex))
                    .with_context("actual", current_target.map(|d| d.to_hex())));
            }
        }
    }

    let target_kind = resolve_target_kind(tx, new);
    tx.ref_upsert(name, new, target_kind, now, Some(actor), Some(push_id))?;

    if records_history {
        let parent = tx.history_latest_for_ref(name)?;
        let meta: Value = if force { json!({"force": true}) } else { json!({}) };
        let id = HistoryEntry::compute_id(
            parent.as_ref(),
            now,
            actor,
            name,
            current_target.as_ref(),
            new,
            &meta,
        )
        .map_err(|e| {
            KaiError::new(ErrorCode::InvalidCanonicalJson, "history meta").with_source(e)
        })?;
        tx.history_append(
            &id,
            parent.as_ref(),
            now,
            actor,
            name,
            current_target.as_ref(),
            new,
            &meta,
        )?;
    }

    Ok(RefEntry {
        name: name.to_string(),
        target: *new,
        target_kind,
        created_at: current.map_or(now, |r| r.created_at),
        updated_at: now,
        actor: Some(actor.to_string()),
        push_id: Some(push_id.to_string()),
    })
}

/// Best-effort kind of the ref target: the node's kind when it is stored
/// here, the indexed object's declared kind on a server, `Snapshot`
/// otherwise (refs may legitimately point at objects that arrive later).
fn resolve_target_kind(tx: &StoreTx<'_>, target: &Digest) -> NodeKind {
    if let Ok(Some(node)) = tx.node(target) {
        return node.kind;
    }
    if tx.profile() == StoreProfile::Server {
        if let Ok(Some(obj)) = tx.object_lookup(target) {
            if let Ok(kind) = NodeKind::from_str(&obj.kind) {
                return kind;
            }
        }
    }
    NodeKind::Snapshot
}
