// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-core
//!
//! The content-addressed graph model: canonical JSON encoding, blake3
//! digests, typed nodes and edges, per-kind payload schemas, and the ref /
//! ref-history types shared by the client and server stores.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod canon;
pub mod id;
pub mod node;
pub mod payload;
pub mod refspec;

pub use canon::{CanonError, canonical_json, canonical_json_string};
pub use id::{Digest, DigestError, NodeId, node_bytes, node_id, parse_node_bytes};
pub use node::{Edge, EdgeType, Node, NodeKind, UnknownEdgeType, UnknownKind};
pub use payload::{
    ChangeCategory, ChangeEvidence, ChangeSetPayload, ChangeTypePayload, FilePayload,
    ModulePayload, ReviewCommentPayload, ReviewPayload, ReviewStatus, SnapshotFileEntry,
    SnapshotPayload, SymbolKind, SymbolPayload, SymbolRange, WorkspacePayload, WorkspaceStatus,
};
pub use refspec::{
    CS_LAST, CS_PREV, EPHEMERAL_REFS, HistoryEntry, MAX_REF_NAME_LEN, RefEntry, RefUpdate,
    RefUpdateResult, SNAP_LATEST, SNAP_WORKING, is_ephemeral_ref, ref_name_valid,
};
