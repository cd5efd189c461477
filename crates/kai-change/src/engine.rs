// SPDX-License-Identifier: MIT OR Apache-2.0
//! The change engine: diff two snapshots, classify, and persist a
//! ChangeSet with its evidence graph.

use crate::classify::{ClassifierRegistry, DetectedChange};
use crate::diff::{SnapshotDiff, diff_manifests};
use kai_core::{
    CS_LAST, CS_PREV, ChangeCategory, ChangeEvidence, ChangeSetPayload, ChangeTypePayload, Digest,
    Edge, EdgeType, NodeKind, SnapshotPayload,
};
use kai_error::{KaiError, Result};
use kai_glob::ModuleMatcher;
use kai_refs::RefRegistry;
use kai_snapshot::SnapshotBuilder;
use kai_store::GraphStore;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Options for one changeset computation.
#[derive(Clone, Debug)]
pub struct ChangeOptions {
    /// Short title.
    pub title: String,
    /// Longer description (user-supplied).
    pub description: String,
    /// Intent sentence; an empty string means "to be generated later".
    pub intent: String,
    /// Payload timestamp, epoch milliseconds.
    pub created_at: i64,
    /// Whether to rotate the ephemeral `cs.last` / `cs.prev` refs.
    pub update_refs: bool,
}

impl ChangeOptions {
    /// Minimal options with the given timestamp.
    #[must_use]
    pub fn at(created_at: i64) -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            intent: String::new(),
            created_at,
            update_refs: true,
        }
    }
}

/// Result of a changeset computation.
#[derive(Clone, Debug)]
pub struct ChangeOutcome {
    /// Id of the ChangeSet node.
    pub changeset_id: Digest,
    /// Ids of the inserted ChangeType nodes, in evidence order.
    pub change_type_ids: Vec<Digest>,
    /// Names of affected modules.
    pub affected_modules: Vec<String>,
    /// The path-level diff the classification was based on.
    pub diff: SnapshotDiff,
}

/// Computes and persists changesets.
pub struct ChangeEngine<'a> {
    store: &'a GraphStore,
    registry: &'a ClassifierRegistry,
    matcher: Option<&'a ModuleMatcher>,
}

impl<'a> ChangeEngine<'a> {
    /// An engine over `store` with the given classifier registry.
    #[must_use]
    pub fn new(store: &'a GraphStore, registry: &'a ClassifierRegistry) -> Self {
        Self {
            store,
            registry,
            matcher: None,
        }
    }

    /// Attach a module matcher; changed paths then produce `AFFECTS`
    /// edges to Module nodes.
    #[must_use]
    pub fn with_matcher(mut self, matcher: &'a ModuleMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Diff `base → head`, classify every changed file, and persist the
    /// ChangeSet node with `MODIFIES`, `HAS`, and `AFFECTS` edges.
    ///
    /// A classifier failure on one file degrades that file to
    /// `FILE_CONTENT_CHANGED`; it never fails the changeset.
    ///
    /// # Errors
    ///
    /// `node_not_found` when either snapshot is absent; storage failures
    /// roll the whole changeset back.
    pub fn compute(
        &self,
        base_id: &Digest,
        head_id: &Digest,
        opts: &ChangeOptions,
    ) -> Result<ChangeOutcome> {
        let base = SnapshotBuilder::load(self.store, base_id)?;
        let head = SnapshotBuilder::load(self.store, head_id)?;
        let diff = diff_manifests(&base, &head);

        // (path, detected changes) for every changed file.
        let mut detected: Vec<(String, Vec<DetectedChange>)> = Vec::new();
        for path in &diff.modified {
            detected.push((path.clone(), self.classify_modified(&base, &head, path)));
        }
        for path in &diff.added {
            detected.push((
                path.clone(),
                vec![DetectedChange {
                    category: ChangeCategory::FileAdded,
                    symbols: vec![],
                    before: None,
                    after: None,
                }],
            ));
        }
        for path in &diff.deleted {
            detected.push((
                path.clone(),
                vec![DetectedChange {
                    category: ChangeCategory::FileDeleted,
                    symbols: vec![],
                    before: None,
                    after: None,
                }],
            ));
        }

        let symbol_ids = self.head_symbol_ids(head_id)?;

        let changeset = ChangeSetPayload {
            base: base_id.to_hex(),
            head: head_id.to_hex(),
            title: opts.title.clone(),
            description: opts.description.clone(),
            intent: opts.intent.clone(),
            created_at: opts.created_at,
        };

        let affected: BTreeSet<String> = match self.matcher {
            Some(matcher) => detected
                .iter()
                .flat_map(|(path, _)| matcher.match_path(path))
                .collect(),
            None => BTreeSet::new(),
        };

        let created_at = opts.created_at;
        let matcher = self.matcher;
        let (changeset_id, change_type_ids) = self.store.with_tx(|tx| {
            let cs = tx.put_node(NodeKind::ChangeSet, &changeset.to_value(), created_at)?;

            let mut change_type_ids = Vec::new();
            for (path, changes) in &detected {
                for change in changes {
                    let resolved: Vec<String> = change
                        .symbols
                        .iter()
                        .filter_map(|name| symbol_ids.get(&(path.clone(), name.clone())))
                        .map(Digest::to_hex)
                        .collect();
                    let payload = ChangeTypePayload {
                        category: change.category,
                        evidence: ChangeEvidence {
                            symbols: resolved.clone(),
                            files: vec![path.clone()],
                            before: change.before.clone(),
                            after: change.after.clone(),
                        },
                    };
                    let ct = tx.put_node(NodeKind::ChangeType, &payload.to_value(), created_at)?;
                    tx.put_edge(&Edge::new(cs.id, EdgeType::Has, ct.id), created_at)?;
                    change_type_ids.push(ct.id);

                    for hex in &resolved {
                        if let Ok(symbol_id) = Digest::from_hex(hex) {
                            tx.put_edge(
                                &Edge::new(cs.id, EdgeType::Modifies, symbol_id),
                                created_at,
                            )?;
                        }
                    }
                }
            }

            // MODIFIES edges to the changed File nodes: head-side nodes for
            // added/modified paths, base-side nodes for deletions.
            for path in diff.added.iter().chain(&diff.modified) {
                if let Some(entry) = head.file(path) {
                    if let Ok(file_id) = Digest::from_hex(&entry.digest) {
                        tx.put_edge(&Edge::new(cs.id, EdgeType::Modifies, file_id), created_at)?;
                    }
                }
            }
            for path in &diff.deleted {
                if let Some(entry) = base.file(path) {
                    if let Ok(file_id) = Digest::from_hex(&entry.digest) {
                        tx.put_edge(&Edge::new(cs.id, EdgeType::Modifies, file_id), created_at)?;
                    }
                }
            }

            if let Some(matcher) = matcher {
                for name in &affected {
                    if let Some(payload) = matcher.module_payload(name) {
                        let module =
                            tx.put_node(NodeKind::Module, &payload.to_value(), created_at)?;
                        tx.put_edge(&Edge::new(cs.id, EdgeType::Affects, module.id), created_at)?;
                    }
                }
            }

            Ok((cs.id, change_type_ids))
        })?;

        if opts.update_refs {
            self.rotate_refs(&changeset_id, created_at)?;
        }

        info!(
            changeset = %changeset_id.short(),
            changes = change_type_ids.len(),
            modules = affected.len(),
            "changeset computed"
        );

        Ok(ChangeOutcome {
            changeset_id,
            change_type_ids,
            affected_modules: affected.into_iter().collect(),
            diff,
        })
    }

    /// Classify one modified path, degrading to `FILE_CONTENT_CHANGED` on
    /// any classifier problem.
    fn classify_modified(
        &self,
        base: &SnapshotPayload,
        head: &SnapshotPayload,
        path: &str,
    ) -> Vec<DetectedChange> {
        let fallback = || {
            vec![DetectedChange {
                category: ChangeCategory::FileContentChanged,
                symbols: vec![],
                before: None,
                after: None,
            }]
        };

        let (Some(base_entry), Some(head_entry)) = (base.file(path), head.file(path)) else {
            return fallback();
        };
        let Some(classifier) = self.registry.get(&head_entry.lang) else {
            debug!(path, lang = %head_entry.lang, "no structural detector, content change");
            return fallback();
        };

        let before = self.read_blob(&base_entry.content_digest);
        let after = self.read_blob(&head_entry.content_digest);
        let (Some(before), Some(after)) = (before, after) else {
            warn!(path, "missing content blob during classification");
            return fallback();
        };

        match classifier.detect_changes(path, &before, &after) {
            Ok(changes) if changes.is_empty() => fallback(),
            Ok(changes) => changes,
            Err(err) => {
                warn!(path, error = %err, "classifier failed, degrading to content change");
                fallback()
            }
        }
    }

    fn read_blob(&self, hex: &str) -> Option<Vec<u8>> {
        let digest = Digest::from_hex(hex).ok()?;
        self.store.object_bytes(&digest).ok().flatten()
    }

    /// `(path, symbol name) → symbol node id` for the head snapshot.
    fn head_symbol_ids(&self, head_id: &Digest) -> Result<BTreeMap<(String, String), Digest>> {
        let mut out = BTreeMap::new();
        for edge in self
            .store
            .edges_at(head_id, Some(EdgeType::DefinesIn))?
        {
            if let Some(node) = self.store.node(&edge.src)? {
                let name = node.payload.get("name").and_then(|v| v.as_str());
                let file = node.payload.get("file").and_then(|v| v.as_str());
                if let (Some(name), Some(file)) = (name, file) {
                    out.insert((file.to_string(), name.to_string()), edge.src);
                }
            }
        }
        Ok(out)
    }

    fn rotate_refs(&self, changeset_id: &Digest, now: i64) -> Result<()> {
        let refs = RefRegistry::new(self.store);
        let previous = refs.get(CS_LAST)?;
        if let Some(prev) = previous {
            refs.force_set(CS_PREV, &prev.target, "local", "", now)?;
        }
        refs.force_set(CS_LAST, changeset_id, "local", "", now)?;
        Ok(())
    }
}
