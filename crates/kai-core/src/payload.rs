// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recognised per-kind payload schemas.
//!
//! Payloads are stored as JSON and addressed through their canonical form,
//! so field names here are the wire truth: camelCase, with optional fields
//! omitted entirely when absent (a `null` would change the digest).

use crate::canon::CanonError;
use crate::id::{NodeId, node_id};
use crate::node::NodeKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// Serialisation of these closed structs cannot fail: every field is a
// string, integer, vec, or enum with a plain serde representation.
fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).expect("payload structs serialise infallibly")
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Payload of a `File` node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    /// Repository-relative path, `/`-separated.
    pub path: String,
    /// Detected language tag, or empty when unknown.
    pub lang: String,
    /// Lowercase hex blake3 of the file content.
    pub digest: String,
    /// Content size in bytes.
    pub size: u64,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

impl FilePayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }

    /// Content address of this payload.
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn id(&self) -> Result<NodeId, CanonError> {
        node_id(NodeKind::File, &self.to_value())
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// Payload of a `Module` node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulePayload {
    /// Module name.
    pub name: String,
    /// Glob patterns that map paths into this module.
    pub paths: Vec<String>,
}

impl ModulePayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }

    /// Content address of this payload.
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn id(&self) -> Result<NodeId, CanonError> {
        node_id(NodeKind::Module, &self.to_value())
    }
}

// ---------------------------------------------------------------------------
// Symbol
// ---------------------------------------------------------------------------

/// Symbol classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    /// A function or method.
    Function,
    /// A class or type definition.
    Class,
    /// A variable or constant binding.
    Variable,
    /// An interface or trait.
    Interface,
    /// A module-level construct.
    Module,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Variable => "variable",
            Self::Interface => "interface",
            Self::Module => "module",
        };
        f.write_str(s)
    }
}

/// Source range of a symbol: `[line, col]` start and end, zero-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRange {
    /// Start position.
    pub start: [u32; 2],
    /// End position.
    pub end: [u32; 2],
}

/// Payload of a `Symbol` node.
///
/// `snapshot_id` makes symbols uniquely addressed per snapshot: the same
/// function in two snapshots is two Symbol nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPayload {
    /// Symbol name.
    pub name: String,
    /// Classification.
    pub kind: SymbolKind,
    /// Path of the defining file.
    pub file: String,
    /// Source range.
    pub range: SymbolRange,
    /// Declared signature text.
    pub signature: String,
    /// Hex id of the snapshot this symbol belongs to.
    pub snapshot_id: String,
}

impl SymbolPayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }

    /// Content address of this payload.
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn id(&self) -> Result<NodeId, CanonError> {
        node_id(NodeKind::Symbol, &self.to_value())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One file entry inside a snapshot manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFileEntry {
    /// Repository-relative path.
    pub path: String,
    /// Language tag or empty.
    pub lang: String,
    /// Hex id of the File node.
    pub digest: String,
    /// Hex blake3 of the raw content blob.
    pub content_digest: String,
}

/// Payload of a `Snapshot` node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPayload {
    /// Where the files came from (`"dir"`, `"git"`, `"mem"`, …).
    pub source_type: String,
    /// Source-specific reference (directory path, git ref, …).
    pub source_ref: String,
    /// Number of entries in `files`.
    pub file_count: u64,
    /// Optional human description. Omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Manifest, sorted byte-wise by `path`.
    pub files: Vec<SnapshotFileEntry>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

impl SnapshotPayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }

    /// Content address of this payload.
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn id(&self) -> Result<NodeId, CanonError> {
        node_id(NodeKind::Snapshot, &self.to_value())
    }

    /// Look up a manifest entry by path.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&SnapshotFileEntry> {
        self.files.iter().find(|f| f.path == path)
    }
}

// ---------------------------------------------------------------------------
// ChangeSet / ChangeType
// ---------------------------------------------------------------------------

/// Payload of a `ChangeSet` node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetPayload {
    /// Hex id of the base snapshot.
    pub base: String,
    /// Hex id of the head snapshot.
    pub head: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Intent sentence (may be generated later by enrichment).
    pub intent: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

impl ChangeSetPayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }

    /// Content address of this payload.
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn id(&self) -> Result<NodeId, CanonError> {
        node_id(NodeKind::ChangeSet, &self.to_value())
    }
}

/// Stable classification of one detected change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeCategory {
    /// A function appeared.
    FunctionAdded,
    /// A function disappeared.
    FunctionRemoved,
    /// A function body changed without a signature change.
    FunctionModified,
    /// A branch condition changed.
    ConditionChanged,
    /// A constant's value changed.
    ConstantUpdated,
    /// A public signature changed.
    ApiSurfaceChanged,
    /// A file appeared.
    FileAdded,
    /// A file disappeared.
    FileDeleted,
    /// File content changed with no finer classification available.
    FileContentChanged,
}

impl ChangeCategory {
    /// Stable storage string (matches the serde form).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FunctionAdded => "FUNCTION_ADDED",
            Self::FunctionRemoved => "FUNCTION_REMOVED",
            Self::FunctionModified => "FUNCTION_MODIFIED",
            Self::ConditionChanged => "CONDITION_CHANGED",
            Self::ConstantUpdated => "CONSTANT_UPDATED",
            Self::ApiSurfaceChanged => "API_SURFACE_CHANGED",
            Self::FileAdded => "FILE_ADDED",
            Self::FileDeleted => "FILE_DELETED",
            Self::FileContentChanged => "FILE_CONTENT_CHANGED",
        }
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence backing a [`ChangeTypePayload`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvidence {
    /// Hex ids of Symbol nodes involved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
    /// Paths involved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Relevant before-text (signature, constant, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// Relevant after-text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Payload of a `ChangeType` node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeTypePayload {
    /// Classification.
    pub category: ChangeCategory,
    /// Supporting evidence.
    pub evidence: ChangeEvidence,
}

impl ChangeTypePayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }

    /// Content address of this payload.
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn id(&self) -> Result<NodeId, CanonError> {
        node_id(NodeKind::ChangeType, &self.to_value())
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Workspace lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    /// Mutation permitted.
    Active,
    /// Parked; may return to active.
    Shelved,
    /// Terminal.
    Closed,
}

impl WorkspaceStatus {
    /// Valid successor states.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [WorkspaceStatus] {
        match self {
            Self::Active => &[Self::Shelved, Self::Closed],
            Self::Shelved => &[Self::Active, Self::Closed],
            Self::Closed => &[],
        }
    }

    /// `true` if `self → next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: WorkspaceStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Shelved => "shelved",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Payload of a `Workspace` node (mutable identity).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspacePayload {
    /// Workspace name.
    pub name: String,
    /// Hex id of the base snapshot.
    pub base_snapshot: String,
    /// Hex id of the current head snapshot.
    pub head_snapshot: String,
    /// Hex ids of open changesets, oldest first.
    pub open_change_sets: Vec<String>,
    /// Lifecycle state.
    pub status: WorkspaceStatus,
    /// Human description.
    pub description: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last mutation time, epoch milliseconds.
    pub updated_at: i64,
}

impl WorkspacePayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }

}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

/// Review lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    /// Review in progress.
    Open,
    /// Review concluded.
    Resolved,
}

/// Payload of a `Review` node (mutable identity).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPayload {
    /// Hex id of the reviewed changeset.
    pub change_set: String,
    /// Reviewer identity.
    pub author: String,
    /// Lifecycle state.
    pub status: ReviewStatus,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last mutation time, epoch milliseconds.
    pub updated_at: i64,
}

impl ReviewPayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }
}

/// Payload of a `ReviewComment` node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCommentPayload {
    /// Hex id of the owning review.
    pub review: String,
    /// Comment author.
    pub author: String,
    /// Comment body.
    pub body: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

impl ReviewCommentPayload {
    /// JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        to_value(self)
    }

    /// Content address of this payload.
    ///
    /// # Errors
    ///
    /// Propagates [`CanonError`].
    pub fn id(&self) -> Result<NodeId, CanonError> {
        node_id(NodeKind::ReviewComment, &self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canon::canonical_json_string;
    use crate::id::Digest;

    #[test]
    fn snapshot_payload_camel_case_and_omitted_description() {
        let payload = SnapshotPayload {
            source_type: "dir".into(),
            source_ref: String::new(),
            file_count: 0,
            description: None,
            files: vec![],
            created_at: 0,
        };
        let canonical = canonical_json_string(&payload.to_value()).unwrap();
        assert_eq!(
            canonical,
            r#"{"createdAt":0,"fileCount":0,"files":[],"sourceRef":"","sourceType":"dir"}"#
        );
    }

    #[test]
    fn snapshot_description_present_when_set() {
        let payload = SnapshotPayload {
            source_type: "dir".into(),
            source_ref: "src".into(),
            file_count: 0,
            description: Some("first".into()),
            files: vec![],
            created_at: 1,
        };
        let v = payload.to_value();
        assert_eq!(v["description"], "first");
    }

    #[test]
    fn file_payload_id_matches_manual_computation() {
        let payload = FilePayload {
            path: "a.js".into(),
            lang: "javascript".into(),
            digest: Digest::of(b"x").to_hex(),
            size: 1,
            created_at: 0,
        };
        let via_struct = payload.id().unwrap();
        let via_value = crate::id::node_id(NodeKind::File, &payload.to_value()).unwrap();
        assert_eq!(via_struct, via_value);
    }

    #[test]
    fn change_category_strings_match_serde() {
        for cat in [
            ChangeCategory::FunctionAdded,
            ChangeCategory::FileContentChanged,
            ChangeCategory::ApiSurfaceChanged,
        ] {
            let json = serde_json::to_string(&cat).unwrap();
            assert_eq!(json, format!("\"{}\"", cat.as_str()));
        }
    }

    #[test]
    fn change_evidence_omits_empty_fields() {
        let payload = ChangeTypePayload {
            category: ChangeCategory::FileAdded,
            evidence: ChangeEvidence {
                files: vec!["b.js".into()],
                ..ChangeEvidence::default()
            },
        };
        let canonical = canonical_json_string(&payload.to_value()).unwrap();
        assert_eq!(
            canonical,
            r#"{"category":"FILE_ADDED","evidence":{"files":["b.js"]}}"#
        );
    }

    #[test]
    fn workspace_status_machine() {
        use WorkspaceStatus::*;
        assert!(Active.can_transition_to(Shelved));
        assert!(Active.can_transition_to(Closed));
        assert!(Shelved.can_transition_to(Active));
        assert!(Shelved.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Shelved));
    }

    #[test]
    fn symbol_payload_roundtrip() {
        let payload = SymbolPayload {
            name: "login".into(),
            kind: SymbolKind::Function,
            file: "auth.js".into(),
            range: SymbolRange { start: [0, 0], end: [4, 1] },
            signature: "function login(user)".into(),
            snapshot_id: Digest::of(b"snap").to_hex(),
        };
        let v = payload.to_value();
        assert_eq!(v["snapshotId"], payload.snapshot_id);
        let back: SymbolPayload = serde_json::from_value(v).unwrap();
        assert_eq!(back, payload);
    }
}
