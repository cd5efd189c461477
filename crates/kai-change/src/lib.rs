// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-change
//!
//! Diffs two snapshots, classifies symbol-level changes through
//! per-language detectors, and persists the resulting ChangeSet with its
//! `MODIFIES` / `HAS` / `AFFECTS` evidence graph.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod diff;
mod engine;
mod intent;

pub use classify::{
    ChangeClassifier, ClassifierRegistry, DetectedChange, SymbolDiffClassifier,
};
pub use diff::{SnapshotDiff, diff_manifests, diff_snapshots};
pub use engine::{ChangeEngine, ChangeOptions, ChangeOutcome};
pub use intent::{IntentGenerator, TemplateIntentGenerator};
