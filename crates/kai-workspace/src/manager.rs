// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace lifecycle and staging.
//!
//! A workspace is a mutable-identity node holding a `(baseSnapshot,
//! headSnapshot)` pointer pair. Staging builds a candidate snapshot from a
//! file source, computes the changeset against the current head, advances
//! the head, and queues the changeset; integration replays the queued
//! changesets onto a target snapshot through per-file 3-way merges.

use crate::merge::{ConflictKind, FileMerge, merge_file};
use kai_change::{ChangeEngine, ChangeOptions, ClassifierRegistry};
use kai_core::{
    Digest, Edge, EdgeType, NodeKind, WorkspacePayload, WorkspaceStatus,
};
use kai_error::{ErrorCode, KaiError, Result};
use kai_glob::ModuleMatcher;
use kai_snapshot::{
    FileSource, MemSource, NullExtractor, SnapshotBuilder, SnapshotOptions, SourceFile,
    SymbolExtractor,
};
use kai_store::GraphStore;
use std::collections::BTreeMap;
use tracing::info;

/// A workspace loaded from the store.
#[derive(Clone, Debug)]
pub struct WorkspaceView {
    /// Node id.
    pub id: Digest,
    /// Current payload.
    pub payload: WorkspacePayload,
}

/// Result of staging a file source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    /// The source matches the current head exactly; nothing was written.
    NoChanges,
    /// A new head snapshot and changeset were recorded.
    Staged {
        /// The candidate snapshot that became the new head.
        snapshot_id: Digest,
        /// The queued changeset.
        changeset_id: Digest,
    },
}

/// One conflicting file from an integration attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrationConflict {
    /// Conflicting path.
    pub path: String,
    /// Conflict category.
    pub kind: ConflictKind,
    /// Human-readable detail.
    pub detail: String,
}

/// Result of integrating a workspace onto a target snapshot.
#[derive(Clone, Debug)]
pub struct IntegrationOutcome {
    /// The merged snapshot, when every file merged cleanly.
    pub merged_snapshot: Option<Digest>,
    /// Conflicts, when any file failed to merge.
    pub conflicts: Vec<IntegrationConflict>,
}

impl IntegrationOutcome {
    /// `true` when integration produced a merged snapshot.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.merged_snapshot.is_some()
    }
}

/// Capabilities staging needs; injected so the manager never selects
/// concrete implementations itself.
pub struct StagingDeps<'a> {
    /// Symbol extraction for the candidate snapshot (optional).
    pub extractor: Option<&'a dyn SymbolExtractor>,
    /// Per-language change classifiers.
    pub registry: &'a ClassifierRegistry,
    /// Module matcher for `AFFECTS` edges (optional).
    pub matcher: Option<&'a ModuleMatcher>,
}

/// Manages workspace nodes over a [`GraphStore`].
pub struct WorkspaceManager<'a> {
    store: &'a GraphStore,
}

fn snapshot_pointer(hex: &str) -> Result<Digest> {
    Digest::from_hex(hex).map_err(|e| {
        KaiError::new(ErrorCode::MalformedDigest, "stored snapshot pointer malformed")
            .with_source(e)
    })
}

impl<'a> WorkspaceManager<'a> {
    /// A manager over `store`.
    #[must_use]
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Create a workspace with identical base and head, status `active`.
    ///
    /// # Errors
    ///
    /// `node_not_found` when the base snapshot is absent.
    pub fn create(
        &self,
        name: &str,
        base_snapshot: &Digest,
        description: &str,
        now: i64,
    ) -> Result<Digest> {
        let base = self
            .store
            .node(base_snapshot)?
            .filter(|n| n.kind == NodeKind::Snapshot)
            .ok_or_else(|| KaiError::node_not_found(base_snapshot))?;

        let payload = WorkspacePayload {
            name: name.to_string(),
            base_snapshot: base.id.to_hex(),
            head_snapshot: base.id.to_hex(),
            open_change_sets: vec![],
            status: WorkspaceStatus::Active,
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        let id = self.store.with_tx(|tx| {
            let id = tx.put_identity_node(NodeKind::Workspace, &payload.to_value(), now)?;
            tx.put_edge(&Edge::new(id, EdgeType::HeadAt, base.id), now)?;
            Ok(id)
        })?;
        info!(workspace = %id.short(), name, "workspace created");
        Ok(id)
    }

    /// Load a workspace.
    ///
    /// # Errors
    ///
    /// `node_not_found` when absent or not a Workspace node.
    pub fn get(&self, id: &Digest) -> Result<WorkspaceView> {
        let node = self
            .store
            .node(id)?
            .filter(|n| n.kind == NodeKind::Workspace)
            .ok_or_else(|| KaiError::node_not_found(id))?;
        let payload: WorkspacePayload = serde_json::from_value(node.payload)
            .map_err(|e| KaiError::internal("stored workspace payload malformed").with_source(e))?;
        Ok(WorkspaceView { id: *id, payload })
    }

    /// All workspaces, in creation order.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn list(&self) -> Result<Vec<WorkspaceView>> {
        let mut out = Vec::new();
        for node in self.store.nodes_by_kind(NodeKind::Workspace)? {
            let payload: WorkspacePayload =
                serde_json::from_value(node.payload).map_err(|e| {
                    KaiError::internal("stored workspace payload malformed").with_source(e)
                })?;
            out.push(WorkspaceView {
                id: node.id,
                payload,
            });
        }
        Ok(out)
    }

    /// Park an active workspace.
    ///
    /// # Errors
    ///
    /// `workspace_closed` on an illegal transition.
    pub fn shelve(&self, id: &Digest, now: i64) -> Result<()> {
        self.transition(id, WorkspaceStatus::Shelved, now)
    }

    /// Reactivate a shelved workspace.
    ///
    /// # Errors
    ///
    /// `workspace_closed` on an illegal transition.
    pub fn unshelve(&self, id: &Digest, now: i64) -> Result<()> {
        self.transition(id, WorkspaceStatus::Active, now)
    }

    /// Close a workspace permanently.
    ///
    /// # Errors
    ///
    /// `workspace_closed` when already closed.
    pub fn close(&self, id: &Digest, now: i64) -> Result<()> {
        self.transition(id, WorkspaceStatus::Closed, now)
    }

    fn transition(&self, id: &Digest, next: WorkspaceStatus, now: i64) -> Result<()> {
        let view = self.get(id)?;
        if !view.payload.status.can_transition_to(next) {
            return Err(KaiError::new(
                ErrorCode::WorkspaceClosed,
                format!("cannot move workspace from {} to {next}", view.payload.status),
            ));
        }
        let mut payload = view.payload;
        payload.status = next;
        payload.updated_at = now;
        self.store.update_payload(id, &payload.to_value())
    }

    /// Stage a file source into the workspace.
    ///
    /// Builds a candidate snapshot against the current head; when the
    /// candidate's manifest is identical the stage is a no-op. Otherwise
    /// the changeset `head → candidate` is computed, the head advances,
    /// and the changeset joins `openChangeSets`.
    ///
    /// # Errors
    ///
    /// `workspace_closed` unless the workspace is active; storage and
    /// source failures propagate.
    pub fn stage(
        &self,
        id: &Digest,
        source: &dyn FileSource,
        deps: &StagingDeps<'_>,
        title: &str,
        description: &str,
        now: i64,
    ) -> Result<StageOutcome> {
        let view = self.get(id)?;
        if view.payload.status != WorkspaceStatus::Active {
            return Err(KaiError::new(
                ErrorCode::WorkspaceClosed,
                format!("workspace is {}, not active", view.payload.status),
            ));
        }
        let head = snapshot_pointer(&view.payload.head_snapshot)?;

        // Manifest comparison first: identical content means the candidate
        // snapshot would hash to the head (same files, inherited time), so
        // nothing is written.
        let head_manifest: Vec<(String, String)> = SnapshotBuilder::load(self.store, &head)?
            .files
            .iter()
            .map(|f| (f.path.clone(), f.content_digest.clone()))
            .collect();
        let candidate_manifest: Vec<(String, String)> =
            SnapshotBuilder::manifest_digests(source)?
                .into_iter()
                .map(|(path, digest)| (path, digest.to_hex()))
                .collect();
        if head_manifest == candidate_manifest {
            info!(workspace = %id.short(), "stage is a no-op");
            return Ok(StageOutcome::NoChanges);
        }

        let mut builder = SnapshotBuilder::new(self.store);
        if let Some(extractor) = deps.extractor {
            builder = builder.with_extractor(extractor);
        }
        let snapshot = builder.build(
            source,
            &SnapshotOptions {
                description: None,
                created_at: now,
                update_refs: false,
            },
        )?;

        let mut engine = ChangeEngine::new(self.store, deps.registry);
        if let Some(matcher) = deps.matcher {
            engine = engine.with_matcher(matcher);
        }
        let change = engine.compute(
            &head,
            &snapshot.snapshot_id,
            &ChangeOptions {
                title: title.to_string(),
                description: description.to_string(),
                intent: String::new(),
                created_at: now,
                update_refs: true,
            },
        )?;

        let mut payload = view.payload.clone();
        payload.head_snapshot = snapshot.snapshot_id.to_hex();
        payload.open_change_sets.push(change.changeset_id.to_hex());
        payload.updated_at = now;

        self.store.with_tx(|tx| {
            tx.put_edge(
                &Edge::new(snapshot.snapshot_id, EdgeType::BasedOn, head),
                now,
            )?;
            tx.put_edge(&Edge::new(*id, EdgeType::HasChangeset, change.changeset_id), now)?;
            tx.delete_edge(&Edge::new(*id, EdgeType::HeadAt, head))?;
            tx.put_edge(&Edge::new(*id, EdgeType::HeadAt, snapshot.snapshot_id), now)?;
            tx.update_payload(id, &payload.to_value())?;
            Ok(())
        })?;

        info!(
            workspace = %id.short(),
            snapshot = %snapshot.snapshot_id.short(),
            changeset = %change.changeset_id.short(),
            "staged"
        );
        Ok(StageOutcome::Staged {
            snapshot_id: snapshot.snapshot_id,
            changeset_id: change.changeset_id,
        })
    }

    /// Integrate the workspace's accumulated changes onto `target`.
    ///
    /// Every file across `(workspace base, workspace head, target)` goes
    /// through a symbol-granular 3-way merge. A clean merge produces a new
    /// snapshot `BASED_ON` the target; any conflict produces a report and
    /// no snapshot.
    ///
    /// # Errors
    ///
    /// `workspace_closed` unless active; storage failures propagate.
    pub fn integrate(
        &self,
        id: &Digest,
        target: &Digest,
        extractor: Option<&dyn SymbolExtractor>,
        now: i64,
    ) -> Result<IntegrationOutcome> {
        let view = self.get(id)?;
        if view.payload.status != WorkspaceStatus::Active {
            return Err(KaiError::new(
                ErrorCode::WorkspaceClosed,
                format!("workspace is {}, not active", view.payload.status),
            ));
        }

        let base = SnapshotBuilder::load(self.store, &snapshot_pointer(&view.payload.base_snapshot)?)?;
        let left = SnapshotBuilder::load(self.store, &snapshot_pointer(&view.payload.head_snapshot)?)?;
        let right = SnapshotBuilder::load(self.store, target)?;

        let mut paths: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        let mut langs: BTreeMap<String, String> = BTreeMap::new();
        for manifest in [&base, &left, &right] {
            for entry in &manifest.files {
                paths.insert(entry.path.clone());
                if !entry.lang.is_empty() {
                    langs.insert(entry.path.clone(), entry.lang.clone());
                }
            }
        }

        let null_extractor = NullExtractor;
        let extractor: &dyn SymbolExtractor = extractor.unwrap_or(&null_extractor);

        let mut merged_files: Vec<SourceFile> = Vec::new();
        let mut conflicts = Vec::new();
        for path in &paths {
            let base_bytes = self.manifest_content(&base, path)?;
            let left_bytes = self.manifest_content(&left, path)?;
            let right_bytes = self.manifest_content(&right, path)?;
            let lang = langs.get(path).map(String::as_str);

            match merge_file(
                base_bytes.as_deref(),
                left_bytes.as_deref(),
                right_bytes.as_deref(),
                lang,
                extractor,
            ) {
                FileMerge::Take(Some(content)) => {
                    merged_files.push(SourceFile::new(path.clone(), content));
                }
                FileMerge::Take(None) => {}
                FileMerge::Conflict(kind, detail) => conflicts.push(IntegrationConflict {
                    path: path.clone(),
                    kind,
                    detail,
                }),
            }
        }

        if !conflicts.is_empty() {
            info!(workspace = %id.short(), conflicts = conflicts.len(), "integration conflicted");
            return Ok(IntegrationOutcome {
                merged_snapshot: None,
                conflicts,
            });
        }

        let mut source = MemSource::new(format!("integrate:{}", view.payload.name));
        for file in merged_files {
            source = source.with_source_file(file);
        }
        let outcome = SnapshotBuilder::new(self.store).build(
            &source,
            &SnapshotOptions {
                description: Some(format!("integration of {}", view.payload.name)),
                created_at: now,
                update_refs: false,
            },
        )?;
        self.store.with_tx(|tx| {
            tx.put_edge(
                &Edge::new(outcome.snapshot_id, EdgeType::BasedOn, *target),
                now,
            )
        })?;

        info!(
            workspace = %id.short(),
            merged = %outcome.snapshot_id.short(),
            "integration merged cleanly"
        );
        Ok(IntegrationOutcome {
            merged_snapshot: Some(outcome.snapshot_id),
            conflicts: vec![],
        })
    }

    fn manifest_content(
        &self,
        manifest: &kai_core::SnapshotPayload,
        path: &str,
    ) -> Result<Option<Vec<u8>>> {
        let Some(entry) = manifest.file(path) else {
            return Ok(None);
        };
        let digest = Digest::from_hex(&entry.content_digest).map_err(|e| {
            KaiError::new(ErrorCode::MalformedDigest, "stored content digest malformed")
                .with_source(e)
        })?;
        self.store.object_bytes(&digest)?.map(Some).ok_or_else(|| {
            KaiError::new(
                ErrorCode::MissingDigest,
                format!("content blob missing for {path}"),
            )
        })
    }
}
