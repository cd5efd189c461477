// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP API for the kailab server.
//!
//! Repo-scoped routes live under `/{tenant}/{repo}/v1`. Responses are
//! JSON with hex digest strings; raw object bytes come back verbatim with
//! `X-Kailab-Kind` / `X-Kailab-Digest` headers. Blocking store work runs
//! on the worker pool via `spawn_blocking`.

use crate::config::ServerConfig;
use crate::ingest::ingest_pack;
use crate::registry::{RepoLease, RepoRegistry};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path as AxPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use kai_core::{Digest, NodeKind, SnapshotPayload, parse_node_bytes};
use kai_error::{ErrorCode, ErrorKind, KaiError, Result};
use kai_refs::RefRegistry;
use kai_store::GraphStore;
use kai_sync::proto::{
    ACTOR_HEADER, BatchUpdateRequest, BatchUpdateResponse, ContentResponse, DIGEST_HEADER,
    FileListingEntry, FileListingResponse, IngestResponse, KIND_HEADER, LogEntriesResponse,
    LogHeadResponse, NegotiateRequest, NegotiateResponse, RefInfo, RefListResponse,
    RefPutRequest, RefPutResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::error;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Open repository handles.
    pub registry: Arc<RepoRegistry>,
    /// Server settings.
    pub config: Arc<ServerConfig>,
}

/// Epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Error plumbing
// ---------------------------------------------------------------------------

/// Axum-facing wrapper over [`KaiError`].
pub struct ApiError(KaiError);

impl From<KaiError> for ApiError {
    fn from(err: KaiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Internal details are logged in full and redacted on the wire.
        let message = if self.0.kind() == ErrorKind::Internal {
            error!(error = ?self.0, "internal server error");
            "internal error".to_string()
        } else {
            self.0.message.clone()
        };
        let body = Json(json!({
            "ok": false,
            "error": self.0.code.as_str(),
            "message": message,
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

fn parse_digest(text: &str) -> Result<Digest> {
    Digest::from_hex(text).map_err(|e| {
        KaiError::new(ErrorCode::MalformedDigest, format!("malformed digest: {text}"))
            .with_source(e)
    })
}

/// Run blocking store work on a leased repository.
async fn run_repo<T, F>(state: &AppState, tenant: String, repo: String, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&RepoLease) -> Result<T> + Send + 'static,
{
    let lease = state.registry.acquire(&tenant, &repo)?;
    tokio::task::spawn_blocking(move || f(&lease))
        .await
        .map_err(|e| KaiError::internal("blocking task failed").with_source(e))?
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the full router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/admin/v1/repos", post(create_repo).get(list_repos))
        .route("/admin/v1/repos/{tenant}/{repo}", axum::routing::delete(delete_repo))
        .route("/{tenant}/{repo}/v1/push/negotiate", post(negotiate))
        .route("/{tenant}/{repo}/v1/objects/pack", post(receive_pack))
        .route("/{tenant}/{repo}/v1/objects/{digest}", get(get_object))
        .route("/{tenant}/{repo}/v1/refs", get(list_refs))
        .route("/{tenant}/{repo}/v1/refs/batch", post(batch_refs))
        .route(
            "/{tenant}/{repo}/v1/refs/{*name}",
            get(get_ref).put(put_ref),
        )
        .route("/{tenant}/{repo}/v1/log/head", get(log_head))
        .route("/{tenant}/{repo}/v1/log/entries", get(log_entries))
        .route("/{tenant}/{repo}/v1/files/{*refname}", get(list_files))
        .route("/{tenant}/{repo}/v1/content/{digest}", get(get_content))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health / admin
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readyz(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let probe = state.config.data_root.join(".readyz-probe");
    std::fs::write(&probe, b"ok")
        .and_then(|()| std::fs::remove_file(&probe))
        .map_err(|e| KaiError::internal("data root is not writable").with_source(e))?;
    Ok(Json(json!({
        "status": "ready",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

#[derive(Deserialize)]
struct CreateRepoRequest {
    tenant: String,
    repo: String,
}

async fn create_repo(
    State(state): State<AppState>,
    Json(req): Json<CreateRepoRequest>,
) -> ApiResult<impl IntoResponse> {
    state.registry.create(&req.tenant, &req.repo)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"tenant": req.tenant, "repo": req.repo})),
    ))
}

async fn list_repos(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<serde_json::Value>> {
    let repos = state.registry.list(params.get("tenant").map(String::as_str))?;
    let repos: Vec<serde_json::Value> = repos
        .into_iter()
        .map(|(tenant, repo)| json!({"tenant": tenant, "repo": repo}))
        .collect();
    Ok(Json(json!({"repos": repos})))
}

async fn delete_repo(
    State(state): State<AppState>,
    AxPath((tenant, repo)): AxPath<(String, String)>,
) -> ApiResult<StatusCode> {
    state.registry.delete(&tenant, &repo)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Objects & packs
// ---------------------------------------------------------------------------

async fn negotiate(
    State(state): State<AppState>,
    AxPath((tenant, repo)): AxPath<(String, String)>,
    Json(req): Json<NegotiateRequest>,
) -> ApiResult<Json<NegotiateResponse>> {
    let missing = run_repo(&state, tenant, repo, move |lease| {
        let mut missing = Vec::new();
        for digest in req.digests {
            if !lease.store().has_object(&digest)? && !lease.store().has_node(&digest)? {
                missing.push(digest);
            }
        }
        Ok(missing)
    })
    .await?;
    Ok(Json(NegotiateResponse { missing }))
}

async fn receive_pack(
    State(state): State<AppState>,
    AxPath((tenant, repo)): AxPath<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IngestResponse>> {
    if body.len() > state.config.max_pack_bytes() {
        return Err(KaiError::new(
            ErrorCode::PackTooLarge,
            format!("pack exceeds {} MiB", state.config.max_pack_mib),
        )
        .into());
    }
    let actor = actor_from(&headers);
    let limits = state.config.pack_limits();
    let receipt = run_repo(&state, tenant, repo, move |lease| {
        ingest_pack(lease.store(), &body, &actor, &limits, now_millis())
    })
    .await?;
    Ok(Json(IngestResponse {
        segment_id: receipt.segment_id,
        indexed: receipt.indexed,
    }))
}

async fn get_object(
    State(state): State<AppState>,
    AxPath((tenant, repo, digest)): AxPath<(String, String, String)>,
) -> ApiResult<Response> {
    let digest = parse_digest(&digest)?;
    let found = run_repo(&state, tenant, repo, move |lease| {
        // Loose lookup first covers nodes materialised by enrichment.
        if let Some(bytes) = lease.store().raw_node_bytes(&digest)? {
            let kind = lease
                .store()
                .node(&digest)?
                .map(|n| n.kind.as_str().to_string())
                .unwrap_or_default();
            return Ok(Some((kind, bytes)));
        }
        lease.store().segment_object_bytes(&digest)
    })
    .await?;

    let Some((kind, bytes)) = found else {
        return Err(KaiError::object_not_found(digest).into());
    };
    let mut response = (StatusCode::OK, bytes).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = header::HeaderValue::from_str(&kind) {
        response.headers_mut().insert(KIND_HEADER, value);
    }
    if let Ok(value) = header::HeaderValue::from_str(&digest.to_hex()) {
        response.headers_mut().insert(DIGEST_HEADER, value);
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Refs
// ---------------------------------------------------------------------------

fn ref_info(entry: kai_core::RefEntry) -> RefInfo {
    RefInfo {
        name: entry.name,
        target: entry.target,
        updated_at: entry.updated_at,
        actor: entry.actor,
    }
}

async fn list_refs(
    State(state): State<AppState>,
    AxPath((tenant, repo)): AxPath<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<RefListResponse>> {
    let prefix = params.get("prefix").cloned();
    let refs = run_repo(&state, tenant, repo, move |lease| {
        RefRegistry::new(lease.store()).list(prefix.as_deref())
    })
    .await?;
    Ok(Json(RefListResponse {
        refs: refs.into_iter().map(ref_info).collect(),
    }))
}

async fn get_ref(
    State(state): State<AppState>,
    AxPath((tenant, repo, name)): AxPath<(String, String, String)>,
) -> ApiResult<Json<RefInfo>> {
    let found = run_repo(&state, tenant, repo, move |lease| {
        RefRegistry::new(lease.store()).get(&name)
    })
    .await?;
    found
        .map(|entry| Json(ref_info(entry)))
        .ok_or_else(|| KaiError::ref_not_found("ref").into())
}

async fn put_ref(
    State(state): State<AppState>,
    AxPath((tenant, repo, name)): AxPath<(String, String, String)>,
    headers: HeaderMap,
    Json(req): Json<RefPutRequest>,
) -> ApiResult<Json<RefPutResponse>> {
    let actor = actor_from(&headers);
    let push_id = uuid::Uuid::new_v4().to_string();
    let push_id_out = push_id.clone();
    let entry = run_repo(&state, tenant, repo, move |lease| {
        let refs = RefRegistry::new(lease.store());
        let now = now_millis();
        if req.force {
            refs.force_set(&name, &req.new, &actor, &push_id, now)
        } else {
            refs.set_fast_forward(&name, req.old.as_ref(), &req.new, &actor, &push_id, now)
        }
    })
    .await?;
    Ok(Json(RefPutResponse {
        ok: true,
        push_id: push_id_out,
        updated_at: entry.updated_at,
    }))
}

async fn batch_refs(
    State(state): State<AppState>,
    AxPath((tenant, repo)): AxPath<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<BatchUpdateRequest>,
) -> ApiResult<Json<BatchUpdateResponse>> {
    let actor = actor_from(&headers);
    let push_id = uuid::Uuid::new_v4().to_string();
    let push_id_out = push_id.clone();
    let results = run_repo(&state, tenant, repo, move |lease| {
        RefRegistry::new(lease.store()).batch_update(&req.updates, &actor, &push_id, now_millis())
    })
    .await?;
    Ok(Json(BatchUpdateResponse {
        push_id: push_id_out,
        results,
    }))
}

// ---------------------------------------------------------------------------
// Ref history
// ---------------------------------------------------------------------------

async fn log_head(
    State(state): State<AppState>,
    AxPath((tenant, repo)): AxPath<(String, String)>,
) -> ApiResult<Json<LogHeadResponse>> {
    let head = run_repo(&state, tenant, repo, move |lease| {
        RefRegistry::new(lease.store()).head()
    })
    .await?;
    Ok(Json(LogHeadResponse { head }))
}

#[derive(Deserialize)]
struct EntriesQuery {
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    after: Option<i64>,
    limit: Option<usize>,
}

async fn log_entries(
    State(state): State<AppState>,
    AxPath((tenant, repo)): AxPath<(String, String)>,
    Query(query): Query<EntriesQuery>,
) -> ApiResult<Json<LogEntriesResponse>> {
    let entries = run_repo(&state, tenant, repo, move |lease| {
        RefRegistry::new(lease.store()).entries(
            query.ref_name.as_deref(),
            query.after,
            query.limit,
        )
    })
    .await?;
    Ok(Json(LogEntriesResponse { entries }))
}

// ---------------------------------------------------------------------------
// Files & content
// ---------------------------------------------------------------------------

/// Load a snapshot payload from the graph tables or, failing that, from
/// the object store.
fn load_snapshot(store: &GraphStore, digest: &Digest) -> Result<SnapshotPayload> {
    if let Some(node) = store.node(digest)? {
        if node.kind == NodeKind::Snapshot {
            return serde_json::from_value(node.payload).map_err(|e| {
                KaiError::internal("stored snapshot payload malformed").with_source(e)
            });
        }
    }
    let Some((_, bytes)) = store.segment_object_bytes(digest)? else {
        return Err(KaiError::object_not_found(digest));
    };
    let Some((NodeKind::Snapshot, payload)) = parse_node_bytes(&bytes) else {
        return Err(KaiError::new(
            ErrorCode::UnknownKind,
            "object is not a snapshot",
        ));
    };
    serde_json::from_value(payload)
        .map_err(|e| KaiError::internal("stored snapshot payload malformed").with_source(e))
}

async fn list_files(
    State(state): State<AppState>,
    AxPath((tenant, repo, refname)): AxPath<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<FileListingResponse>> {
    let path_filter = params.get("path").cloned();
    let response = run_repo(&state, tenant, repo, move |lease| {
        let refs = RefRegistry::new(lease.store());
        let entry = refs
            .get(&refname)?
            .ok_or_else(|| KaiError::ref_not_found(&refname))?;
        let snapshot = load_snapshot(lease.store(), &entry.target)?;
        let files = snapshot
            .files
            .iter()
            .filter(|f| path_filter.as_deref().is_none_or(|p| f.path.starts_with(p)))
            .map(|f| FileListingEntry {
                path: f.path.clone(),
                digest: f.digest.clone(),
                content_digest: f.content_digest.clone(),
                lang: f.lang.clone(),
            })
            .collect();
        Ok(FileListingResponse {
            snapshot_digest: entry.target,
            files,
        })
    })
    .await?;
    Ok(Json(response))
}

async fn get_content(
    State(state): State<AppState>,
    AxPath((tenant, repo, digest)): AxPath<(String, String, String)>,
) -> ApiResult<Json<ContentResponse>> {
    use base64::Engine as _;
    let digest = parse_digest(&digest)?;
    let response = run_repo(&state, tenant, repo, move |lease| {
        let Some(bytes) = lease.store().object_bytes(&digest)? else {
            return Err(KaiError::object_not_found(digest));
        };
        // Path and language come from a materialised File node when one
        // cites this content digest.
        let hex = digest.to_hex();
        let mut path = None;
        let mut lang = None;
        for node in lease.store().nodes_by_kind(NodeKind::File)? {
            if node.payload.get("digest").and_then(|v| v.as_str()) == Some(hex.as_str()) {
                path = node
                    .payload
                    .get("path")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                lang = node
                    .payload
                    .get("lang")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                break;
            }
        }
        Ok(ContentResponse {
            path,
            digest,
            content: base64::engine::general_purpose::STANDARD.encode(&bytes),
            lang,
        })
    })
    .await?;
    Ok(Json(response))
}
