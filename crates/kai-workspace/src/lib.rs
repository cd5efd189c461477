// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-workspace
//!
//! Mutable workspace overlays on snapshots: create/stage/shelve/close,
//! symbol-granular 3-way integration, and reviews over changesets.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod manager;
mod merge;
mod review;

pub use manager::{
    IntegrationConflict, IntegrationOutcome, StageOutcome, StagingDeps, WorkspaceManager,
    WorkspaceView,
};
pub use merge::{ConflictKind, FileMerge, merge_file};
pub use review::ReviewManager;
