// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed nodes and edges of the semantic graph.

use crate::id::Digest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// Every node in the graph carries one of these kinds.
///
/// Most kinds are content-addressed: their id is a hash of kind + payload.
/// `Workspace` and `Review` are mutable-identity kinds whose payload may be
/// updated in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    /// A single file's metadata (content lives in the object store).
    File,
    /// A named grouping of paths.
    Module,
    /// A code symbol extracted from a file, addressed per snapshot.
    Symbol,
    /// An immutable record of a set of files at a point in time.
    Snapshot,
    /// Classified differences between two snapshots.
    ChangeSet,
    /// One classified change inside a changeset.
    ChangeType,
    /// A mutable overlay advancing a head snapshot (mutable identity).
    Workspace,
    /// A review of a changeset (mutable identity).
    Review,
    /// A single review comment.
    ReviewComment,
}

/// Error for unrecognised kind strings.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown node kind: {0}")]
pub struct UnknownKind(pub String);

impl NodeKind {
    /// All kinds, for iteration in schema and tests.
    pub const ALL: [NodeKind; 9] = [
        Self::File,
        Self::Module,
        Self::Symbol,
        Self::Snapshot,
        Self::ChangeSet,
        Self::ChangeType,
        Self::Workspace,
        Self::Review,
        Self::ReviewComment,
    ];

    /// Stable string form used in storage, addressing, and on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "File",
            Self::Module => "Module",
            Self::Symbol => "Symbol",
            Self::Snapshot => "Snapshot",
            Self::ChangeSet => "ChangeSet",
            Self::ChangeType => "ChangeType",
            Self::Workspace => "Workspace",
            Self::Review => "Review",
            Self::ReviewComment => "ReviewComment",
        }
    }

    /// `true` for kinds whose id is generated rather than content-derived
    /// and whose payload may be updated in place.
    #[must_use]
    pub fn is_mutable_identity(&self) -> bool {
        matches!(self, Self::Workspace | Self::Review)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// EdgeType
// ---------------------------------------------------------------------------

/// Relationship types between nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Module contains file/symbol.
    Contains,
    /// Symbol is defined in file (context-scoped to a snapshot).
    DefinesIn,
    /// Snapshot has file.
    HasFile,
    /// ChangeSet modifies file/symbol.
    Modifies,
    /// ChangeSet has change type.
    Has,
    /// ChangeSet affects module.
    Affects,
    /// Snapshot is based on an earlier snapshot.
    BasedOn,
    /// Workspace's current head snapshot.
    HeadAt,
    /// Workspace has an open changeset.
    HasChangeset,
    /// Review reviews a changeset.
    ReviewOf,
    /// Review has a comment.
    HasComment,
    /// Comment anchors to a symbol or file.
    AnchorsTo,
    /// Node supersedes an earlier node.
    Supersedes,
}

/// Error for unrecognised edge type strings.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown edge type: {0}")]
pub struct UnknownEdgeType(pub String);

impl EdgeType {
    /// All edge types.
    pub const ALL: [EdgeType; 13] = [
        Self::Contains,
        Self::DefinesIn,
        Self::HasFile,
        Self::Modifies,
        Self::Has,
        Self::Affects,
        Self::BasedOn,
        Self::HeadAt,
        Self::HasChangeset,
        Self::ReviewOf,
        Self::HasComment,
        Self::AnchorsTo,
        Self::Supersedes,
    ];

    /// Stable storage form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::DefinesIn => "DEFINES_IN",
            Self::HasFile => "HAS_FILE",
            Self::Modifies => "MODIFIES",
            Self::Has => "HAS",
            Self::Affects => "AFFECTS",
            Self::BasedOn => "BASED_ON",
            Self::HeadAt => "HEAD_AT",
            Self::HasChangeset => "HAS_CHANGESET",
            Self::ReviewOf => "REVIEW_OF",
            Self::HasComment => "HAS_COMMENT",
            Self::AnchorsTo => "ANCHORS_TO",
            Self::Supersedes => "SUPERSEDES",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = UnknownEdgeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownEdgeType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Node / Edge
// ---------------------------------------------------------------------------

/// A stored graph node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    /// 32-byte id (content address or widened identity).
    pub id: Digest,
    /// Kind tag.
    pub kind: NodeKind,
    /// JSON payload, canonical at rest.
    pub payload: Value,
    /// Insertion time, epoch milliseconds.
    pub created_at: i64,
}

/// A directed, optionally context-scoped edge.
///
/// The edge key is the full `(src, type, dst, at)` tuple; inserting a
/// duplicate is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub src: Digest,
    /// Relationship.
    pub edge_type: EdgeType,
    /// Destination node id.
    pub dst: Digest,
    /// Optional context node scoping this edge (e.g. the snapshot a
    /// `DEFINES_IN` edge belongs to).
    pub at: Option<Digest>,
}

impl Edge {
    /// An unscoped edge.
    #[must_use]
    pub fn new(src: Digest, edge_type: EdgeType, dst: Digest) -> Self {
        Self { src, edge_type, dst, at: None }
    }

    /// A context-scoped edge.
    #[must_use]
    pub fn scoped(src: Digest, edge_type: EdgeType, dst: Digest, at: Digest) -> Self {
        Self { src, edge_type, dst, at: Some(at) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_roundtrip() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let err = "Blob".parse::<NodeKind>().unwrap_err();
        assert_eq!(err, UnknownKind("Blob".to_string()));
    }

    #[test]
    fn only_workspace_and_review_are_mutable() {
        let mutable: Vec<_> = NodeKind::ALL
            .iter()
            .filter(|k| k.is_mutable_identity())
            .collect();
        assert_eq!(mutable, [&NodeKind::Workspace, &NodeKind::Review]);
    }

    #[test]
    fn edge_type_strings_roundtrip() {
        for t in EdgeType::ALL {
            assert_eq!(t.as_str().parse::<EdgeType>().unwrap(), t);
        }
    }

    #[test]
    fn edge_key_includes_context() {
        let a = Digest::of(b"a");
        let b = Digest::of(b"b");
        let s = Digest::of(b"s");
        let unscoped = Edge::new(a, EdgeType::DefinesIn, b);
        let scoped = Edge::scoped(a, EdgeType::DefinesIn, b, s);
        assert_ne!(unscoped, scoped);
    }
}
