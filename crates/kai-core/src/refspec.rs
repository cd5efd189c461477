// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named refs and the hash-chained ref history.
//!
//! A ref is a mutable named pointer to a node id. Updates follow
//! fast-forward discipline and, on the server, append one entry to an
//! append-only history whose entries form a per-ref hash chain.

use crate::canon::{CanonError, canonical_json};
use crate::id::Digest;
use crate::node::NodeKind;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Maximum length of a ref name in bytes.
pub const MAX_REF_NAME_LEN: usize = 255;

/// Ephemeral client-side refs. These are rotated freely, are not GC roots,
/// and are excluded from push closures by default.
pub const EPHEMERAL_REFS: [&str; 4] = [SNAP_WORKING, SNAP_LATEST, CS_LAST, CS_PREV];

/// The snapshot currently being worked on.
pub const SNAP_WORKING: &str = "snap.working";
/// The most recently built snapshot.
pub const SNAP_LATEST: &str = "snap.latest";
/// The most recently computed changeset.
pub const CS_LAST: &str = "cs.last";
/// The changeset before `cs.last`.
pub const CS_PREV: &str = "cs.prev";

/// `true` when `name` is one of the ephemeral refs.
#[must_use]
pub fn is_ephemeral_ref(name: &str) -> bool {
    EPHEMERAL_REFS.contains(&name)
}

/// Validate a ref name: 1–255 bytes of ASCII with no control characters.
#[must_use]
pub fn ref_name_valid(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_REF_NAME_LEN
        && name.bytes().all(|b| b.is_ascii() && !b.is_ascii_control())
}

/// A stored ref row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefEntry {
    /// Ref name, unique.
    pub name: String,
    /// Target node id.
    pub target: Digest,
    /// Kind of the target node.
    pub target_kind: NodeKind,
    /// First set, epoch milliseconds.
    pub created_at: i64,
    /// Last update, epoch milliseconds.
    pub updated_at: i64,
    /// Who last updated the ref (server-side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Push id of the last update (server-side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_id: Option<String>,
}

/// One entry in a batch ref update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefUpdate {
    /// Ref name.
    pub name: String,
    /// Expected current target; `None` asserts the ref does not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Digest>,
    /// New target.
    pub new: Digest,
    /// Bypass the fast-forward equality check.
    #[serde(default)]
    pub force: bool,
}

/// Per-entry result of a batch ref update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefUpdateResult {
    /// Ref name.
    pub name: String,
    /// Whether this entry was applied.
    pub ok: bool,
    /// Stable error string when `ok` is false (e.g. `"ref_mismatch"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Update time when `ok` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Ref history
// ---------------------------------------------------------------------------

/// One append-only ref-history entry.
///
/// `parent` is the id of the prior entry **for the same ref** (or `None`
/// for the first), so each ref's entries form a hash chain; `seq` threads
/// every entry into a global monotonic order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Global sequence number (commit order).
    pub seq: i64,
    /// Entry id: blake3 of the canonical meta.
    pub id: Digest,
    /// Id of the previous entry for this ref.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Digest>,
    /// Update time, epoch milliseconds.
    pub time: i64,
    /// Who performed the update.
    pub actor: String,
    /// The updated ref.
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Previous target, if the ref existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Digest>,
    /// New target.
    pub new: Digest,
    /// Extra metadata recorded with the entry (`{"force":true}` on force
    /// pushes).
    pub meta: Value,
}

impl HistoryEntry {
    /// The canonical meta object the entry id is computed over. Everything
    /// except `seq` (assigned by the database) and `id` itself.
    #[must_use]
    pub fn id_payload(
        parent: Option<&Digest>,
        time: i64,
        actor: &str,
        ref_name: &str,
        old: Option<&Digest>,
        new: &Digest,
        meta: &Value,
    ) -> Value {
        json!({
            "parent": parent.map(Digest::to_hex),
            "time": time,
            "actor": actor,
            "ref": ref_name,
            "old": old.map(Digest::to_hex),
            "new": new.to_hex(),
            "meta": meta,
        })
    }

    /// Compute the entry id over the canonical meta.
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn compute_id(
        parent: Option<&Digest>,
        time: i64,
        actor: &str,
        ref_name: &str,
        old: Option<&Digest>,
        new: &Digest,
        meta: &Value,
    ) -> Result<Digest, CanonError> {
        let payload = Self::id_payload(parent, time, actor, ref_name, old, new, meta);
        Ok(Digest::of(&canonical_json(&payload)?))
    }

    /// Recompute and compare this entry's id (chain verification).
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn verify_id(&self) -> Result<bool, CanonError> {
        let expected = Self::compute_id(
            self.parent.as_ref(),
            self.time,
            &self.actor,
            &self.ref_name,
            self.old.as_ref(),
            &self.new,
            &self.meta,
        )?;
        Ok(expected == self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_name_rules() {
        assert!(ref_name_valid("snap.main"));
        assert!(ref_name_valid("remote/origin/snap.main"));
        assert!(!ref_name_valid(""));
        assert!(!ref_name_valid("bad\nname"));
        assert!(!ref_name_valid("ünïcode"));
        assert!(!ref_name_valid(&"x".repeat(256)));
        assert!(ref_name_valid(&"x".repeat(255)));
    }

    #[test]
    fn ephemeral_refs_are_recognised() {
        assert!(is_ephemeral_ref("snap.working"));
        assert!(is_ephemeral_ref("cs.prev"));
        assert!(!is_ephemeral_ref("snap.main"));
    }

    #[test]
    fn history_id_is_deterministic_and_chains() {
        let t1 = Digest::of(b"t1");
        let t2 = Digest::of(b"t2");
        let first = HistoryEntry::compute_id(
            None, 10, "alice", "snap.main", None, &t1, &json!({}),
        )
        .unwrap();
        let again = HistoryEntry::compute_id(
            None, 10, "alice", "snap.main", None, &t1, &json!({}),
        )
        .unwrap();
        assert_eq!(first, again);

        let second = HistoryEntry::compute_id(
            Some(&first), 20, "alice", "snap.main", Some(&t1), &t2, &json!({}),
        )
        .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn verify_id_detects_tampering() {
        let target = Digest::of(b"t");
        let id = HistoryEntry::compute_id(None, 5, "bob", "r", None, &target, &json!({}))
            .unwrap();
        let mut entry = HistoryEntry {
            seq: 1,
            id,
            parent: None,
            time: 5,
            actor: "bob".into(),
            ref_name: "r".into(),
            old: None,
            new: target,
            meta: json!({}),
        };
        assert!(entry.verify_id().unwrap());
        entry.actor = "mallory".into();
        assert!(!entry.verify_id().unwrap());
    }

    #[test]
    fn force_meta_changes_id() {
        let target = Digest::of(b"t");
        let plain =
            HistoryEntry::compute_id(None, 5, "a", "r", None, &target, &json!({})).unwrap();
        let forced =
            HistoryEntry::compute_id(None, 5, "a", "r", None, &target, &json!({"force": true}))
                .unwrap();
        assert_ne!(plain, forced);
    }
}
