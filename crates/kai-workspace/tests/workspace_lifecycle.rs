// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace lifecycle: create, stage, status machine, integration, and
//! reviews.

use kai_change::ClassifierRegistry;
use kai_core::{Digest, EdgeType, NodeKind, WorkspaceStatus};
use kai_snapshot::{
    MemSource, SimpleFunctionExtractor, SnapshotBuilder, SnapshotOptions,
};
use kai_store::GraphStore;
use kai_workspace::{
    ConflictKind, ReviewManager, StageOutcome, StagingDeps, WorkspaceManager,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: GraphStore,
    registry: ClassifierRegistry,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::init_repo(dir.path()).unwrap();
        let registry =
            ClassifierRegistry::with_default_script_langs(Arc::new(SimpleFunctionExtractor));
        Self {
            _dir: dir,
            store,
            registry,
        }
    }

    fn snapshot(&self, files: &[(&str, &[u8])], at: i64) -> Digest {
        let mut source = MemSource::new("fixture");
        for (path, content) in files {
            source = source.with_file(path, content);
        }
        let extractor = SimpleFunctionExtractor;
        SnapshotBuilder::new(&self.store)
            .with_extractor(&extractor)
            .build(&source, &SnapshotOptions {
                description: None,
                created_at: at,
                update_refs: false,
            })
            .unwrap()
            .snapshot_id
    }

    fn deps(&self) -> StagingDeps<'_> {
        StagingDeps {
            extractor: None,
            registry: &self.registry,
            matcher: None,
        }
    }
}

#[test]
fn create_sets_identical_base_and_head() {
    let fx = Fixture::new();
    let snap = fx.snapshot(&[("a.js", b"x")], 0);
    let manager = WorkspaceManager::new(&fx.store);

    let ws = manager.create("feature", &snap, "try things", 10).unwrap();
    let view = manager.get(&ws).unwrap();

    assert_eq!(view.payload.base_snapshot, snap.to_hex());
    assert_eq!(view.payload.head_snapshot, snap.to_hex());
    assert_eq!(view.payload.status, WorkspaceStatus::Active);
    assert!(view.payload.open_change_sets.is_empty());

    // HEAD_AT edge points at the base.
    let edges = fx.store.edges_from(&ws, Some(EdgeType::HeadAt)).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].dst, snap);
}

#[test]
fn stage_with_identical_source_is_a_noop() {
    let fx = Fixture::new();
    let snap = fx.snapshot(&[("a.js", b"x")], 0);
    let manager = WorkspaceManager::new(&fx.store);
    let ws = manager.create("feature", &snap, "", 1).unwrap();

    let source = MemSource::new("same").with_file("a.js", b"x");
    let outcome = manager
        .stage(&ws, &source, &fx.deps(), "", "", 2)
        .unwrap();

    assert_eq!(outcome, StageOutcome::NoChanges);
    let view = manager.get(&ws).unwrap();
    assert_eq!(view.payload.head_snapshot, snap.to_hex());
    assert!(view.payload.open_change_sets.is_empty());
    assert!(fx.store.nodes_by_kind(NodeKind::ChangeSet).unwrap().is_empty());
}

#[test]
fn stage_advances_head_and_queues_changeset() {
    let fx = Fixture::new();
    let snap = fx.snapshot(&[("a.js", b"x")], 0);
    let manager = WorkspaceManager::new(&fx.store);
    let ws = manager.create("feature", &snap, "", 1).unwrap();

    let source = MemSource::new("next")
        .with_file("a.js", b"y")
        .with_file("b.js", b"z");
    let StageOutcome::Staged {
        snapshot_id,
        changeset_id,
    } = manager
        .stage(&ws, &source, &fx.deps(), "tweak a", "", 2)
        .unwrap()
    else {
        panic!("expected a staged outcome");
    };

    let view = manager.get(&ws).unwrap();
    assert_eq!(view.payload.head_snapshot, snapshot_id.to_hex());
    assert_eq!(view.payload.open_change_sets, vec![changeset_id.to_hex()]);

    // Lineage: the new head is BASED_ON the old one.
    let based_on = fx
        .store
        .edges_from(&snapshot_id, Some(EdgeType::BasedOn))
        .unwrap();
    assert_eq!(based_on.len(), 1);
    assert_eq!(based_on[0].dst, snap);

    // The workspace owns the changeset and its HEAD_AT moved.
    let has_cs = fx
        .store
        .edges_from(&ws, Some(EdgeType::HasChangeset))
        .unwrap();
    assert_eq!(has_cs[0].dst, changeset_id);
    let head_at = fx.store.edges_from(&ws, Some(EdgeType::HeadAt)).unwrap();
    assert_eq!(head_at.len(), 1);
    assert_eq!(head_at[0].dst, snapshot_id);
}

#[test]
fn status_machine_enforced() {
    let fx = Fixture::new();
    let snap = fx.snapshot(&[("a.js", b"x")], 0);
    let manager = WorkspaceManager::new(&fx.store);
    let ws = manager.create("feature", &snap, "", 1).unwrap();

    manager.shelve(&ws, 2).unwrap();
    assert_eq!(
        manager.get(&ws).unwrap().payload.status,
        WorkspaceStatus::Shelved
    );

    // Mutation while shelved is rejected.
    let source = MemSource::new("next").with_file("a.js", b"changed");
    let err = manager
        .stage(&ws, &source, &fx.deps(), "", "", 3)
        .unwrap_err();
    assert_eq!(err.code, kai_error::ErrorCode::WorkspaceClosed);

    manager.unshelve(&ws, 4).unwrap();
    manager.close(&ws, 5).unwrap();

    // Closed is terminal.
    assert!(manager.unshelve(&ws, 6).is_err());
    assert!(manager.shelve(&ws, 7).is_err());
}

#[test]
fn integration_merges_disjoint_edits() {
    let fx = Fixture::new();
    let base_files: &[(&str, &[u8])] = &[(
        "lib.js",
        b"function a() {\n  return 1;\n}\nfunction b() {\n  return 1;\n}\n",
    )];
    let base = fx.snapshot(base_files, 0);

    let manager = WorkspaceManager::new(&fx.store);
    let ws = manager.create("feature", &base, "", 1).unwrap();

    // Workspace changes function a.
    let ws_source = MemSource::new("ws").with_file(
        "lib.js",
        b"function a() {\n  return 99;\n}\nfunction b() {\n  return 1;\n}\n",
    );
    manager.stage(&ws, &ws_source, &fx.deps(), "", "", 2).unwrap();

    // Target independently changes function b.
    let target = fx.snapshot(
        &[(
            "lib.js",
            b"function a() {\n  return 1;\n}\nfunction b() {\n  return 42;\n}\n",
        )],
        3,
    );

    let extractor = SimpleFunctionExtractor;
    let outcome = manager
        .integrate(&ws, &target, Some(&extractor), 4)
        .unwrap();
    assert!(outcome.is_clean(), "conflicts: {:?}", outcome.conflicts);

    let merged = SnapshotBuilder::load(&fx.store, &outcome.merged_snapshot.unwrap()).unwrap();
    let entry = merged.file("lib.js").unwrap();
    let content = fx
        .store
        .object_bytes(&Digest::from_hex(&entry.content_digest).unwrap())
        .unwrap()
        .unwrap();
    let text = String::from_utf8(content).unwrap();
    assert!(text.contains("return 99"));
    assert!(text.contains("return 42"));

    // The merged snapshot is based on the target.
    let based_on = fx
        .store
        .edges_from(&outcome.merged_snapshot.unwrap(), Some(EdgeType::BasedOn))
        .unwrap();
    assert_eq!(based_on[0].dst, target);
}

#[test]
fn integration_reports_conflicts() {
    let fx = Fixture::new();
    let base = fx.snapshot(&[("lib.js", b"function a() {\n  return 1;\n}\n")], 0);

    let manager = WorkspaceManager::new(&fx.store);
    let ws = manager.create("feature", &base, "", 1).unwrap();
    let ws_source =
        MemSource::new("ws").with_file("lib.js", b"function a() {\n  return 2;\n}\n");
    manager.stage(&ws, &ws_source, &fx.deps(), "", "", 2).unwrap();

    // Target changed the same function body.
    let target = fx.snapshot(&[("lib.js", b"function a() {\n  return 3;\n}\n")], 3);

    let extractor = SimpleFunctionExtractor;
    let outcome = manager
        .integrate(&ws, &target, Some(&extractor), 4)
        .unwrap();
    assert!(!outcome.is_clean());
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].kind, ConflictKind::TextOverlap);
    assert_eq!(outcome.conflicts[0].path, "lib.js");
}

#[test]
fn reviews_attach_to_changesets() {
    let fx = Fixture::new();
    let snap = fx.snapshot(&[("a.js", b"x")], 0);
    let manager = WorkspaceManager::new(&fx.store);
    let ws = manager.create("feature", &snap, "", 1).unwrap();
    let source = MemSource::new("next").with_file("a.js", b"y");
    let StageOutcome::Staged { changeset_id, .. } = manager
        .stage(&ws, &source, &fx.deps(), "", "", 2)
        .unwrap()
    else {
        panic!("expected staged");
    };

    let reviews = ReviewManager::new(&fx.store);
    let review = reviews.create(&changeset_id, "bob", 3).unwrap();

    let comment = reviews
        .add_comment(&review, "bob", "looks risky", None, 4)
        .unwrap();
    assert_eq!(reviews.comments(&review).unwrap(), vec![comment]);

    reviews.resolve(&review, 5).unwrap();
    let err = reviews
        .add_comment(&review, "bob", "too late", None, 6)
        .unwrap_err();
    assert_eq!(err.code, kai_error::ErrorCode::WorkspaceClosed);

    // REVIEW_OF edge points at the changeset.
    let edges = fx.store.edges_from(&review, Some(EdgeType::ReviewOf)).unwrap();
    assert_eq!(edges[0].dst, changeset_id);
}
