// SPDX-License-Identifier: MIT OR Apache-2.0
//! Manifest-level snapshot diffing.

use kai_core::{Digest, SnapshotPayload};
use kai_error::Result;
use kai_snapshot::SnapshotBuilder;
use kai_store::GraphStore;
use std::collections::BTreeMap;

/// Path-level difference between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Paths present only in head, sorted.
    pub added: Vec<String>,
    /// Paths present only in base, sorted.
    pub deleted: Vec<String>,
    /// Paths in both with different content, sorted.
    pub modified: Vec<String>,
    /// Paths in both with identical content, sorted.
    pub unchanged: Vec<String>,
}

impl SnapshotDiff {
    /// `true` when nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    /// Total changed paths (added + deleted + modified).
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.added.len() + self.deleted.len() + self.modified.len()
    }
}

/// Compare two snapshot manifests.
pub fn diff_manifests(base: &SnapshotPayload, head: &SnapshotPayload) -> SnapshotDiff {
    let base_map: BTreeMap<&str, &str> = base
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.content_digest.as_str()))
        .collect();
    let head_map: BTreeMap<&str, &str> = head
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.content_digest.as_str()))
        .collect();

    let mut diff = SnapshotDiff::default();
    for (path, digest) in &head_map {
        match base_map.get(path) {
            None => diff.added.push((*path).to_string()),
            Some(base_digest) if base_digest != digest => {
                diff.modified.push((*path).to_string());
            }
            Some(_) => diff.unchanged.push((*path).to_string()),
        }
    }
    for path in base_map.keys() {
        if !head_map.contains_key(path) {
            diff.deleted.push((*path).to_string());
        }
    }
    diff
}

/// Load both snapshots and diff them.
///
/// # Errors
///
/// `node_not_found` when either snapshot is absent.
pub fn diff_snapshots(store: &GraphStore, base: &Digest, head: &Digest) -> Result<SnapshotDiff> {
    let base = SnapshotBuilder::load(store, base)?;
    let head = SnapshotBuilder::load(store, head)?;
    Ok(diff_manifests(&base, &head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_core::SnapshotFileEntry;

    fn manifest(entries: &[(&str, &str)]) -> SnapshotPayload {
        SnapshotPayload {
            source_type: "mem".into(),
            source_ref: String::new(),
            file_count: entries.len() as u64,
            description: None,
            files: entries
                .iter()
                .map(|(path, content)| SnapshotFileEntry {
                    path: (*path).to_string(),
                    lang: String::new(),
                    digest: Digest::of(path.as_bytes()).to_hex(),
                    content_digest: Digest::of(content.as_bytes()).to_hex(),
                })
                .collect(),
            created_at: 0,
        }
    }

    #[test]
    fn classifies_all_four_states() {
        let base = manifest(&[("a.js", "x"), ("b.js", "same"), ("gone.js", "bye")]);
        let head = manifest(&[("a.js", "y"), ("b.js", "same"), ("new.js", "hi")]);

        let diff = diff_manifests(&base, &head);
        assert_eq!(diff.modified, vec!["a.js"]);
        assert_eq!(diff.unchanged, vec!["b.js"]);
        assert_eq!(diff.deleted, vec!["gone.js"]);
        assert_eq!(diff.added, vec!["new.js"]);
        assert_eq!(diff.changed_count(), 3);
    }

    #[test]
    fn identical_manifests_are_empty() {
        let base = manifest(&[("a.js", "x")]);
        let diff = diff_manifests(&base, &base.clone());
        assert!(diff.is_empty());
        assert_eq!(diff.unchanged, vec!["a.js"]);
    }
}
