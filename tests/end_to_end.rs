// SPDX-License-Identifier: MIT OR Apache-2.0
//! Full-stack scenarios: a client store syncing with a live server over
//! HTTP: snapshot, diff, push, fast-forward discipline, pack tampering,
//! and workspace staging.

use kailab::change::{ChangeEngine, ChangeOptions, ClassifierRegistry};
use kailab::core::{Digest, EdgeType, NodeKind, SnapshotPayload};
use kailab::pack::{PackObject, build_pack};
use kailab::server::{AppState, RepoRegistry, ServerConfig, build_router};
use kailab::snapshot::{MemSource, SnapshotBuilder, SnapshotOptions};
use kailab::store::GraphStore;
use kailab::sync::{RemoteClient, fetch, push};
use std::sync::Arc;
use tempfile::TempDir;

/// Boot a server on an ephemeral port; returns its base URL.
async fn spawn_server(data_root: &std::path::Path) -> String {
    let config = ServerConfig {
        data_root: data_root.to_path_buf(),
        bind: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let registry = Arc::new(RepoRegistry::new(&config).unwrap());
    let app = build_router(AppState {
        registry,
        config: Arc::new(config),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn create_repo(base: &str, tenant: &str, repo: &str) {
    let response = reqwest::Client::new()
        .post(format!("{base}/admin/v1/repos"))
        .json(&serde_json::json!({"tenant": tenant, "repo": repo}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
}

fn client_snapshot(store: &GraphStore, files: &[(&str, &[u8])], at: i64) -> Digest {
    let mut source = MemSource::new("e2e");
    for (path, content) in files {
        source = source.with_file(path, content);
    }
    SnapshotBuilder::new(store)
        .build(&source, &SnapshotOptions::at(at))
        .unwrap()
        .snapshot_id
}

// -- Scenario 1: empty init → snapshot --------------------------------------

#[test]
fn empty_init_snapshot_has_the_literal_expected_id() {
    let dir = TempDir::new().unwrap();
    let store = GraphStore::init_repo(dir.path()).unwrap();

    let payload = SnapshotPayload {
        source_type: "dir".into(),
        source_ref: String::new(),
        file_count: 0,
        description: None,
        files: vec![],
        created_at: 0,
    };
    let first = store
        .put_node(NodeKind::Snapshot, &payload.to_value(), 0)
        .unwrap();

    let expected = Digest::of(
        b"Snapshot\n{\"createdAt\":0,\"fileCount\":0,\"files\":[],\"sourceRef\":\"\",\"sourceType\":\"dir\"}",
    );
    assert_eq!(first.id, expected);
    assert!(first.inserted);

    let second = store
        .put_node(NodeKind::Snapshot, &payload.to_value(), 99)
        .unwrap();
    assert_eq!(second.id, expected);
    assert!(!second.inserted);
}

// -- Scenario 2: two-file diff -----------------------------------------------

#[test]
fn two_file_diff_produces_exactly_two_change_types() {
    let dir = TempDir::new().unwrap();
    let store = GraphStore::init_repo(dir.path()).unwrap();

    let a = client_snapshot(&store, &[("a.js", b"x")], 0);
    let b = client_snapshot(&store, &[("a.js", b"y"), ("b.js", b"z")], 1);

    let registry = ClassifierRegistry::new();
    let outcome = ChangeEngine::new(&store, &registry)
        .compute(&a, &b, &ChangeOptions::at(2))
        .unwrap();

    let mut categories: Vec<(String, String)> = outcome
        .change_type_ids
        .iter()
        .map(|id| {
            let node = store.node(id).unwrap().unwrap();
            (
                node.payload["category"].as_str().unwrap().to_string(),
                node.payload["evidence"]["files"][0]
                    .as_str()
                    .unwrap()
                    .to_string(),
            )
        })
        .collect();
    categories.sort();
    assert_eq!(
        categories,
        vec![
            ("FILE_ADDED".to_string(), "b.js".to_string()),
            ("FILE_CONTENT_CHANGED".to_string(), "a.js".to_string()),
        ]
    );

    // MODIFIES edges point at B's File nodes.
    let head = SnapshotBuilder::load(&store, &b).unwrap();
    let modifies = store
        .edges_from(&outcome.changeset_id, Some(EdgeType::Modifies))
        .unwrap();
    let targets: Vec<String> = modifies.iter().map(|e| e.dst.to_hex()).collect();
    assert!(targets.contains(&head.file("a.js").unwrap().digest));
    assert!(targets.contains(&head.file("b.js").unwrap().digest));
}

// -- Scenario 3: fast-forward push -------------------------------------------

#[tokio::test]
async fn fast_forward_push_roundtrip() {
    let server_dir = TempDir::new().unwrap();
    let base = spawn_server(server_dir.path()).await;
    create_repo(&base, "acme", "web").await;

    let client_dir = TempDir::new().unwrap();
    let store = GraphStore::init_repo(client_dir.path()).unwrap();
    let client = RemoteClient::new(&base, "acme", "web", "alice");

    // First push against an empty remote.
    let s1 = client_snapshot(&store, &[("a.js", b"x")], 0);
    kailab::refs::RefRegistry::new(&store)
        .force_set("snap.main", &s1, "alice", "", 0)
        .unwrap();
    let report = push(&store, &client, &["snap.main"]).await.unwrap();
    assert!(report.results.iter().all(|r| r.ok));
    assert!(report.pushed_objects >= 2, "snapshot and file objects travel");

    let remote = client.get_ref("snap.main").await.unwrap().unwrap();
    assert_eq!(remote.target, s1);

    // Modify, snapshot again, negotiate, push the delta.
    let s2 = client_snapshot(&store, &[("a.js", b"xx")], 1);
    kailab::refs::RefRegistry::new(&store)
        .force_set("snap.main", &s2, "alice", "", 1)
        .unwrap();

    let missing = client.negotiate(&[s1, s2]).await.unwrap();
    assert_eq!(missing, vec![s2], "server lacks only the new snapshot");

    let report = push(&store, &client, &["snap.main"]).await.unwrap();
    assert!(report.results[0].ok);

    let remote = client.get_ref("snap.main").await.unwrap().unwrap();
    assert_eq!(remote.target, s2);

    // The server's ref history chains the two updates.
    let head = client.get_ref("snap.main").await.unwrap().unwrap();
    assert_eq!(head.actor.as_deref(), Some("alice"));
}

// -- Scenario 4: non-fast-forward rejection ----------------------------------

#[tokio::test]
async fn stale_update_is_rejected_with_ref_mismatch() {
    let server_dir = TempDir::new().unwrap();
    let base = spawn_server(server_dir.path()).await;
    create_repo(&base, "acme", "web").await;

    let client_dir = TempDir::new().unwrap();
    let store = GraphStore::init_repo(client_dir.path()).unwrap();
    let client = RemoteClient::new(&base, "acme", "web", "alice");

    let s1 = client_snapshot(&store, &[("a.js", b"1")], 0);
    let s2 = client_snapshot(&store, &[("a.js", b"2")], 1);
    let s3 = client_snapshot(&store, &[("a.js", b"3")], 2);

    client.put_ref("snap.main", None, &s1, false).await.unwrap();
    client.put_ref("snap.main", Some(&s1), &s2, false).await.unwrap();

    // A client whose parent is still S1 tries to move the ref to S3.
    let err = client
        .put_ref("snap.main", Some(&s1), &s3, false)
        .await
        .unwrap_err();
    assert_eq!(err.code, kailab::error::ErrorCode::RefMismatch);

    // The literal wire shape: 409 with ok=false and error=ref_mismatch.
    let raw = reqwest::Client::new()
        .put(format!("{base}/acme/web/v1/refs/snap.main"))
        .json(&serde_json::json!({"old": s1.to_hex(), "new": s3.to_hex()}))
        .send()
        .await
        .unwrap();
    assert_eq!(raw.status(), 409);
    let body: serde_json::Value = raw.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "ref_mismatch");

    let current = client.get_ref("snap.main").await.unwrap().unwrap();
    assert_eq!(current.target, s2, "the ref still points at S2");
}

// -- Scenario 5: pack tamper --------------------------------------------------

#[tokio::test]
async fn tampered_pack_is_rejected_without_partial_insert() {
    let server_dir = TempDir::new().unwrap();
    let base = spawn_server(server_dir.path()).await;
    create_repo(&base, "acme", "web").await;
    let client = RemoteClient::new(&base, "acme", "web", "mallory");

    let first = PackObject::content(b"honest bytes".to_vec());
    let second = PackObject::content(b"also honest".to_vec());
    let first_digest = first.digest();
    let pack = build_pack(&[first, second]).unwrap();

    // Flip one bit inside the second object's body.
    let mut plain = zstd::decode_all(pack.as_slice()).unwrap();
    let last = plain.len() - 1;
    plain[last] ^= 0x01;
    let tampered = zstd::encode_all(plain.as_slice(), 0).unwrap();

    let err = client.send_pack(tampered).await.unwrap_err();
    assert_eq!(err.code, kailab::error::ErrorCode::DigestMismatch);

    // No partial insert: the intact first object is still missing.
    let missing = client.negotiate(&[first_digest]).await.unwrap();
    assert_eq!(missing, vec![first_digest]);
}

// -- Scenario 6: workspace stage no-op ----------------------------------------

#[test]
fn workspace_stage_with_identical_files_is_a_noop() {
    use kailab::workspace::{StageOutcome, StagingDeps, WorkspaceManager};

    let dir = TempDir::new().unwrap();
    let store = GraphStore::init_repo(dir.path()).unwrap();
    let s = client_snapshot(&store, &[("a.js", b"x")], 0);

    let manager = WorkspaceManager::new(&store);
    let ws = manager.create("w", &s, "", 1).unwrap();

    let registry = ClassifierRegistry::new();
    let deps = StagingDeps {
        extractor: None,
        registry: &registry,
        matcher: None,
    };
    let source = MemSource::new("same").with_file("a.js", b"x");
    let outcome = manager.stage(&ws, &source, &deps, "", "", 2).unwrap();

    assert_eq!(outcome, StageOutcome::NoChanges);
    let view = manager.get(&ws).unwrap();
    assert_eq!(view.payload.head_snapshot, s.to_hex());
    assert!(store.nodes_by_kind(NodeKind::ChangeSet).unwrap().is_empty());
}

// -- Fetch --------------------------------------------------------------------

#[tokio::test]
async fn fetch_mirrors_remote_refs_into_namespaced_locals() {
    let server_dir = TempDir::new().unwrap();
    let base = spawn_server(server_dir.path()).await;
    create_repo(&base, "acme", "web").await;

    // Publisher pushes a snapshot.
    let pub_dir = TempDir::new().unwrap();
    let pub_store = GraphStore::init_repo(pub_dir.path()).unwrap();
    let publisher = RemoteClient::new(&base, "acme", "web", "alice");
    let s1 = client_snapshot(&pub_store, &[("a.js", b"shared")], 0);
    kailab::refs::RefRegistry::new(&pub_store)
        .force_set("snap.main", &s1, "alice", "", 0)
        .unwrap();
    push(&pub_store, &publisher, &["snap.main"]).await.unwrap();

    // A second client fetches.
    let sub_dir = TempDir::new().unwrap();
    let sub_store = GraphStore::init_repo(sub_dir.path()).unwrap();
    let subscriber = RemoteClient::new(&base, "acme", "web", "bob");
    let report = fetch(&sub_store, &subscriber, "origin", Some("snap."))
        .await
        .unwrap();

    assert_eq!(report.refs_updated, 1);
    assert_eq!(report.objects_fetched, 1);

    let local = sub_store.ref_get("remote/origin/snap.main").unwrap().unwrap();
    assert_eq!(local.target, s1);
    // The snapshot node itself landed and re-addresses correctly.
    let node = sub_store.node(&s1).unwrap().unwrap();
    assert_eq!(node.kind, NodeKind::Snapshot);
}
