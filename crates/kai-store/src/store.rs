// SPDX-License-Identifier: MIT OR Apache-2.0
//! The graph store: nodes, edges, refs, logs, object blobs, and the
//! server-side segment/audit tables.
//!
//! One `rusqlite` connection per store, guarded by a mutex; WAL mode gives
//! concurrent readers with a single writer. Every multi-statement mutation
//! runs inside [`GraphStore::with_tx`], which retries `database_busy`
//! failures with exponential backoff before surfacing them.

use crate::retry::with_backoff;
use crate::{db_err, schema};
use kai_core::{
    Digest, Edge, EdgeType, HistoryEntry, Node, NodeKind, RefEntry, canonical_json_string,
};
use kai_error::{ErrorCode, KaiError, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Which table set a store carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreProfile {
    /// CLI-side store: core tables plus a loose-object directory.
    Client,
    /// Server store: core tables plus segments, objects, audit chains, and
    /// the enrichment queue.
    Server,
}

/// Client repository directory name.
pub const KAI_DIR: &str = ".kai";
/// Client database file name inside [`KAI_DIR`].
pub const CLIENT_DB: &str = "db.sqlite";
/// Loose-object directory name inside [`KAI_DIR`].
pub const OBJECTS_DIR: &str = "objects";
/// Server database file name inside `<data_root>/<tenant>/<repo>/`.
pub const SERVER_DB: &str = "kailab.db";

/// Result of an idempotent node insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PutNode {
    /// The node's id.
    pub id: Digest,
    /// `false` when the node already existed (insert was a no-op).
    pub inserted: bool,
}

/// Location of an object inside a segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRef {
    /// Owning segment row id.
    pub segment_id: i64,
    /// Offset into the segment's decompressed data region.
    pub off: u64,
    /// Body length.
    pub len: u64,
    /// Declared object kind (a node kind name or `"content"`).
    pub kind: String,
}

/// A claimed enrichment task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichTask {
    /// Queue row id.
    pub id: i64,
    /// Node awaiting enrichment.
    pub node_id: Digest,
    /// Node kind name.
    pub kind: String,
}

/// One entry of the global node-publish announcement chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishEntry {
    /// Global sequence number.
    pub seq: i64,
    /// Entry id (blake3 over the canonical entry meta).
    pub id: Digest,
    /// Previous entry id, `None` for the first.
    pub parent: Option<Digest>,
    /// Publish time, epoch milliseconds.
    pub time: i64,
    /// Publishing actor.
    pub actor: String,
    /// The announced node.
    pub node_id: Digest,
    /// Node kind name.
    pub kind: String,
}

/// An embedded relational graph store.
pub struct GraphStore {
    conn: Mutex<Connection>,
    profile: StoreProfile,
    objects_dir: Option<PathBuf>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("profile", &self.profile)
            .field("objects_dir", &self.objects_dir)
            .finish_non_exhaustive()
    }
}

impl GraphStore {
    // -- Opening ---------------------------------------------------------

    /// Open (creating if necessary) a store at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or migrated.
    pub fn open(path: &Path, profile: StoreProfile) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::from_conn(conn, profile, None)
    }

    /// Open an in-memory store (tests and ephemeral use).
    ///
    /// # Errors
    ///
    /// Fails when migration fails.
    pub fn open_in_memory(profile: StoreProfile) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_conn(conn, profile, None)
    }

    /// Initialise a client repository under `repo_root`: creates
    /// `.kai/db.sqlite` and `.kai/objects/`.
    ///
    /// # Errors
    ///
    /// Fails on filesystem or database errors.
    pub fn init_repo(repo_root: &Path) -> Result<Self> {
        let kai = repo_root.join(KAI_DIR);
        let objects = kai.join(OBJECTS_DIR);
        std::fs::create_dir_all(&objects)
            .map_err(|e| KaiError::internal("create .kai directory").with_source(e))?;
        let conn = Connection::open(kai.join(CLIENT_DB)).map_err(db_err)?;
        Self::from_conn(conn, StoreProfile::Client, Some(objects))
    }

    /// Open an existing client repository under `repo_root`.
    ///
    /// # Errors
    ///
    /// Returns `not_initialized` when no `.kai` store exists there.
    pub fn open_repo(repo_root: &Path) -> Result<Self> {
        let kai = repo_root.join(KAI_DIR);
        let db = kai.join(CLIENT_DB);
        if !db.exists() {
            return Err(KaiError::new(
                ErrorCode::NotInitialized,
                format!("no kailab store under {}", repo_root.display()),
            ));
        }
        let conn = Connection::open(db).map_err(db_err)?;
        Self::from_conn(conn, StoreProfile::Client, Some(kai.join(OBJECTS_DIR)))
    }

    /// Open (creating if necessary) a server store at `db_path`, creating
    /// parent directories.
    ///
    /// # Errors
    ///
    /// Fails on filesystem or database errors.
    pub fn open_server(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KaiError::internal("create repo directory").with_source(e))?;
        }
        let conn = Connection::open(db_path).map_err(db_err)?;
        Self::from_conn(conn, StoreProfile::Server, None)
    }

    fn from_conn(
        conn: Connection,
        profile: StoreProfile,
        objects_dir: Option<PathBuf>,
    ) -> Result<Self> {
        schema::configure(&conn)?;
        schema::migrate(&conn, profile == StoreProfile::Server)?;
        Ok(Self {
            conn: Mutex::new(conn),
            profile,
            objects_dir,
        })
    }

    /// Which profile this store was opened with.
    #[must_use]
    pub fn profile(&self) -> StoreProfile {
        self.profile
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| KaiError::internal("store mutex poisoned"))
    }

    // -- Transactions ----------------------------------------------------

    /// Run `f` inside a single write transaction. Commits on `Ok`, rolls
    /// back on `Err`. `database_busy` is retried with exponential backoff
    /// (base 50 ms, five attempts) before surfacing.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error or the commit failure.
    pub fn with_tx<T>(&self, f: impl Fn(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        with_backoff(|| {
            let mut guard = self.lock()?;
            let tx = guard
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;
            let stx = StoreTx {
                conn: &tx,
                profile: self.profile,
            };
            match f(&stx) {
                Ok(value) => {
                    tx.commit().map_err(db_err)?;
                    Ok(value)
                }
                Err(err) => {
                    // Dropping the transaction rolls it back.
                    drop(tx);
                    Err(err)
                }
            }
        })
    }

    // -- Read-only convenience (single statements, no explicit tx) -------

    /// Fetch a node by id.
    ///
    /// # Errors
    ///
    /// Database failures only; an absent node is `Ok(None)`.
    pub fn node(&self, id: &Digest) -> Result<Option<Node>> {
        {
            let guard = self.lock()?;
            sql::node(&guard, id)
        }
    }

    /// `true` when a node with this id exists.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn has_node(&self, id: &Digest) -> Result<bool> {
        {
            let guard = self.lock()?;
            sql::has_node(&guard, id)
        }
    }

    /// All nodes of a kind, in insertion (log) order.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn nodes_by_kind(&self, kind: NodeKind) -> Result<Vec<Node>> {
        {
            let guard = self.lock()?;
            sql::nodes_by_kind(&guard, kind)
        }
    }

    /// The exact byte sequence this node's id was computed over.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn raw_node_bytes(&self, id: &Digest) -> Result<Option<Vec<u8>>> {
        {
            let guard = self.lock()?;
            sql::raw_node_bytes(&guard, id)
        }
    }

    /// Outgoing edges from `src`, optionally filtered by type.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn edges_from(&self, src: &Digest, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        {
            let guard = self.lock()?;
            sql::edges_from(&guard, src, edge_type)
        }
    }

    /// Incoming edges to `dst` of the given type.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn edges_to(&self, dst: &Digest, edge_type: EdgeType) -> Result<Vec<Edge>> {
        {
            let guard = self.lock()?;
            sql::edges_to(&guard, dst, edge_type)
        }
    }

    /// Edges context-scoped to `at`, optionally filtered by type.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn edges_at(&self, at: &Digest, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        {
            let guard = self.lock()?;
            sql::edges_at(&guard, at, edge_type)
        }
    }

    /// Look up a ref by name.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn ref_get(&self, name: &str) -> Result<Option<RefEntry>> {
        {
            let guard = self.lock()?;
            sql::ref_get(&guard, name)
        }
    }

    /// List refs, optionally restricted to a name prefix, sorted by name.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn ref_list(&self, prefix: Option<&str>) -> Result<Vec<RefEntry>> {
        {
            let guard = self.lock()?;
            sql::ref_list(&guard, prefix)
        }
    }

    /// Resolve a slug, full hex id, or unique hex prefix to a node id.
    ///
    /// # Errors
    ///
    /// `ambiguous_prefix` when a short prefix matches several nodes,
    /// `node_not_found` when nothing matches.
    pub fn resolve(&self, text: &str) -> Result<Digest> {
        {
            let guard = self.lock()?;
            sql::resolve(&guard, text)
        }
    }

    // -- Single-op write conveniences -------------------------------------

    /// Idempotently insert a content-addressed node.
    ///
    /// # Errors
    ///
    /// `invalid_canonical_json` when the payload cannot be canonicalised.
    pub fn put_node(&self, kind: NodeKind, payload: &Value, created_at: i64) -> Result<PutNode> {
        self.with_tx(|tx| tx.put_node(kind, payload, created_at))
    }

    /// Insert a mutable-identity node, returning its fresh id.
    ///
    /// # Errors
    ///
    /// `invalid_input` when `kind` is content-addressed.
    pub fn put_identity_node(
        &self,
        kind: NodeKind,
        payload: &Value,
        created_at: i64,
    ) -> Result<Digest> {
        self.with_tx(|tx| tx.put_identity_node(kind, payload, created_at))
    }

    /// Replace the payload of a mutable-identity node.
    ///
    /// # Errors
    ///
    /// `invalid_input` for content-addressed kinds, `node_not_found` when
    /// absent.
    pub fn update_payload(&self, id: &Digest, payload: &Value) -> Result<()> {
        self.with_tx(|tx| tx.update_payload(id, payload))
    }

    /// Idempotently insert an edge. Returns `true` on first insertion.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn put_edge(&self, edge: &Edge, created_at: i64) -> Result<bool> {
        self.with_tx(|tx| tx.put_edge(edge, created_at))
    }

    /// Delete an edge. Returns `true` when a row was removed.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn delete_edge(&self, edge: &Edge) -> Result<bool> {
        self.with_tx(|tx| tx.delete_edge(edge))
    }

    /// Assign a slug alias to a node id.
    ///
    /// # Errors
    ///
    /// Conflict when the slug is already taken by another node.
    pub fn assign_slug(&self, target: &Digest, slug: &str) -> Result<()> {
        self.with_tx(|tx| tx.assign_slug(target, slug))
    }

    // -- Loose object blobs (client profile) ------------------------------

    /// Write a content blob, addressed by its blake3 digest. Atomic:
    /// written to a temp file in the objects directory, then renamed.
    ///
    /// # Errors
    ///
    /// Fails when the store has no objects directory or on I/O errors.
    pub fn write_object(&self, bytes: &[u8]) -> Result<Digest> {
        let dir = self.objects_dir.as_deref().ok_or_else(|| {
            KaiError::internal("store has no loose object directory")
        })?;
        let digest = Digest::of(bytes);
        let dest = dir.join(digest.to_hex());
        if dest.exists() {
            return Ok(digest);
        }
        std::fs::create_dir_all(dir)
            .map_err(|e| KaiError::internal("create objects dir").with_source(e))?;
        let tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| KaiError::internal("create temp object").with_source(e))?;
        std::fs::write(tmp.path(), bytes)
            .map_err(|e| KaiError::internal("write temp object").with_source(e))?;
        tmp.persist(&dest)
            .map_err(|e| KaiError::internal("persist object").with_source(e.error))?;
        debug!(digest = %digest.short(), size = bytes.len(), "object written");
        Ok(digest)
    }

    /// Read back an object's bytes: loose blobs on the client, segment
    /// slices on the server.
    ///
    /// # Errors
    ///
    /// Database or I/O failures; an absent object is `Ok(None)`.
    pub fn object_bytes(&self, digest: &Digest) -> Result<Option<Vec<u8>>> {
        if let Some(dir) = self.objects_dir.as_deref() {
            let path = dir.join(digest.to_hex());
            match std::fs::read(&path) {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(KaiError::internal("read loose object").with_source(e));
                }
            }
        }
        if self.profile == StoreProfile::Server {
            return self.segment_object_bytes(digest).map(|r| r.map(|(_, b)| b));
        }
        Ok(None)
    }

    /// `true` when the object is stored here (loose or indexed).
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn has_object(&self, digest: &Digest) -> Result<bool> {
        if let Some(dir) = self.objects_dir.as_deref() {
            if dir.join(digest.to_hex()).exists() {
                return Ok(true);
            }
        }
        if self.profile == StoreProfile::Server {
            let conn = self.lock()?;
            return sql::object_lookup(&conn, digest).map(|r| r.is_some());
        }
        Ok(false)
    }

    /// Server-side read of an indexed object: `(kind, bytes)`.
    ///
    /// # Errors
    ///
    /// `segment_not_found` when the index references a missing segment.
    pub fn segment_object_bytes(&self, digest: &Digest) -> Result<Option<(String, Vec<u8>)>> {
        let conn = self.lock()?;
        let Some(obj) = sql::object_lookup(&conn, digest)? else {
            return Ok(None);
        };
        let blob: Vec<u8> = conn
            .query_row(
                "SELECT blob FROM segments WHERE id = ?1",
                params![obj.segment_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| {
                KaiError::new(
                    ErrorCode::SegmentNotFound,
                    format!("segment not found: {}", obj.segment_id),
                )
            })?;
        let data = zstd::decode_all(blob.as_slice())
            .map_err(|e| KaiError::internal("decompress segment").with_source(e))?;
        let start = usize::try_from(obj.off)
            .map_err(|_| KaiError::internal("segment offset overflow"))?;
        let end = start
            .checked_add(usize::try_from(obj.len).map_err(|_| {
                KaiError::internal("segment length overflow")
            })?)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| KaiError::internal("object range outside segment"))?;
        Ok(Some((obj.kind, data[start..end].to_vec())))
    }

    /// Path of the loose-objects directory, when this store has one.
    #[must_use]
    pub fn objects_dir(&self) -> Option<&Path> {
        self.objects_dir.as_deref()
    }
}

// ---------------------------------------------------------------------------
// StoreTx
// ---------------------------------------------------------------------------

/// Typed operations available inside a [`GraphStore::with_tx`] closure.
pub struct StoreTx<'a> {
    conn: &'a Connection,
    profile: StoreProfile,
}

impl StoreTx<'_> {
    // -- Nodes -----------------------------------------------------------

    /// Idempotently insert a content-addressed node; see
    /// [`GraphStore::put_node`].
    ///
    /// # Errors
    ///
    /// `invalid_canonical_json` when canonicalisation fails.
    pub fn put_node(&self, kind: NodeKind, payload: &Value, created_at: i64) -> Result<PutNode> {
        sql::put_node(self.conn, kind, payload, created_at)
    }

    /// Insert a mutable-identity node, returning its fresh id.
    ///
    /// # Errors
    ///
    /// `invalid_input` when `kind` is content-addressed.
    pub fn put_identity_node(
        &self,
        kind: NodeKind,
        payload: &Value,
        created_at: i64,
    ) -> Result<Digest> {
        sql::put_identity_node(self.conn, kind, payload, created_at)
    }

    /// Replace the payload of a mutable-identity node.
    ///
    /// # Errors
    ///
    /// `invalid_input` for content-addressed kinds, `node_not_found` when
    /// absent.
    pub fn update_payload(&self, id: &Digest, payload: &Value) -> Result<()> {
        sql::update_payload(self.conn, id, payload)
    }

    /// Fetch a node by id.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn node(&self, id: &Digest) -> Result<Option<Node>> {
        sql::node(self.conn, id)
    }

    /// `true` when the node exists.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn has_node(&self, id: &Digest) -> Result<bool> {
        sql::has_node(self.conn, id)
    }

    /// The exact addressed byte sequence for a node.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn raw_node_bytes(&self, id: &Digest) -> Result<Option<Vec<u8>>> {
        sql::raw_node_bytes(self.conn, id)
    }

    // -- Edges -----------------------------------------------------------

    /// Idempotently insert an edge. Returns `true` on first insertion.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn put_edge(&self, edge: &Edge, created_at: i64) -> Result<bool> {
        sql::put_edge(self.conn, edge, created_at)
    }

    /// Delete an edge. Returns `true` when a row was removed.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn delete_edge(&self, edge: &Edge) -> Result<bool> {
        sql::delete_edge(self.conn, edge)
    }

    /// Outgoing edges from `src`.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn edges_from(&self, src: &Digest, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        sql::edges_from(self.conn, src, edge_type)
    }

    /// Edges scoped at `at`.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn edges_at(&self, at: &Digest, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        sql::edges_at(self.conn, at, edge_type)
    }

    // -- Refs ------------------------------------------------------------

    /// Look up a ref by name.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn ref_get(&self, name: &str) -> Result<Option<RefEntry>> {
        sql::ref_get(self.conn, name)
    }

    /// List refs by optional prefix.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn ref_list(&self, prefix: Option<&str>) -> Result<Vec<RefEntry>> {
        sql::ref_list(self.conn, prefix)
    }

    /// Insert or update a ref row, preserving `created_at` on update.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn ref_upsert(
        &self,
        name: &str,
        target: &Digest,
        target_kind: NodeKind,
        now: i64,
        actor: Option<&str>,
        push_id: Option<&str>,
    ) -> Result<()> {
        sql::ref_upsert(self.conn, name, target, target_kind, now, actor, push_id)
    }

    /// Delete a ref. Returns `true` when a row was removed.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn ref_delete(&self, name: &str) -> Result<bool> {
        sql::ref_delete(self.conn, name)
    }

    // -- Slugs -----------------------------------------------------------

    /// Assign a slug alias.
    ///
    /// # Errors
    ///
    /// Conflict when the slug is taken by another node.
    pub fn assign_slug(&self, target: &Digest, slug: &str) -> Result<()> {
        sql::assign_slug(self.conn, target, slug)
    }

    // -- Ref history (server profile) ------------------------------------

    /// Latest history entry id for one ref.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn history_latest_for_ref(&self, name: &str) -> Result<Option<Digest>> {
        sql::history_latest_for_ref(self.conn, name)
    }

    /// Append a history entry, returning its assigned `seq`.
    ///
    /// # Errors
    ///
    /// Database failures only.
    #[allow(clippy::too_many_arguments)]
    pub fn history_append(
        &self,
        id: &Digest,
        parent: Option<&Digest>,
        time: i64,
        actor: &str,
        ref_name: &str,
        old: Option<&Digest>,
        new: &Digest,
        meta: &Value,
    ) -> Result<i64> {
        sql::history_append(self.conn, id, parent, time, actor, ref_name, old, new, meta)
    }

    // -- Node publish chain (server profile) -----------------------------

    /// Append a node-publish entry, chaining on the previous one.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn publish_append(
        &self,
        node_id: &Digest,
        kind: &str,
        actor: &str,
        time: i64,
    ) -> Result<i64> {
        sql::publish_append(self.conn, node_id, kind, actor, time)
    }

    // -- Segments & objects (server profile) -----------------------------

    /// Insert a segment row holding a pack's compressed data region.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn segment_insert(
        &self,
        ts: i64,
        checksum: &Digest,
        size: u64,
        blob: &[u8],
    ) -> Result<i64> {
        sql::segment_insert(self.conn, ts, checksum, size, blob)
    }

    /// Index one object into a segment. Idempotent on digest; returns
    /// `true` on first insertion.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn object_index_put(
        &self,
        digest: &Digest,
        segment_id: i64,
        off: u64,
        len: u64,
        kind: &str,
        created_at: i64,
    ) -> Result<bool> {
        sql::object_index_put(self.conn, digest, segment_id, off, len, kind, created_at)
    }

    /// Look up an object's location.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn object_lookup(&self, digest: &Digest) -> Result<Option<ObjectRef>> {
        sql::object_lookup(self.conn, digest)
    }

    // -- Enrichment queue (server profile) -------------------------------

    /// Enqueue a node for deferred enrichment.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn enrich_enqueue(&self, node_id: &Digest, kind: &str, now: i64) -> Result<i64> {
        sql::enrich_enqueue(self.conn, node_id, kind, now)
    }

    /// Claim the oldest pending task (`pending → processing`).
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn enrich_claim(&self, now: i64) -> Result<Option<EnrichTask>> {
        sql::enrich_claim(self.conn, now)
    }

    /// Mark a claimed task done.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn enrich_done(&self, task_id: i64, now: i64) -> Result<()> {
        sql::enrich_finish(self.conn, task_id, now, None)
    }

    /// Mark a claimed task failed, capturing the error string.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn enrich_failed(&self, task_id: i64, now: i64, error: &str) -> Result<()> {
        sql::enrich_finish(self.conn, task_id, now, Some(error))
    }

    /// Which profile the owning store carries.
    #[must_use]
    pub fn profile(&self) -> StoreProfile {
        self.profile
    }

    /// Raw connection access for crate-internal maintenance (GC sweep).
    pub(crate) fn connection(&self) -> &Connection {
        self.conn
    }
}

// ---------------------------------------------------------------------------
// SQL layer: free functions over a connection, shared between StoreTx and
// the read-only conveniences on GraphStore.
// ---------------------------------------------------------------------------

pub(crate) mod sql {
    use super::*;
    use kai_core::node_id;

    fn at_bytes(at: Option<&Digest>) -> Vec<u8> {
        at.map_or_else(Vec::new, |d| d.as_bytes().to_vec())
    }

    fn digest_col(bytes: Vec<u8>) -> rusqlite::Result<Digest> {
        Digest::from_slice(&bytes).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                bytes.len(),
                rusqlite::types::Type::Blob,
                Box::new(e),
            )
        })
    }

    fn opt_digest_col(bytes: Option<Vec<u8>>) -> rusqlite::Result<Option<Digest>> {
        bytes.map(digest_col).transpose()
    }

    fn row_to_edge(
        src: Vec<u8>,
        type_text: String,
        dst: Vec<u8>,
        at: Vec<u8>,
    ) -> rusqlite::Result<Edge> {
        let edge_type = EdgeType::from_str(&type_text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;
        Ok(Edge {
            src: digest_col(src)?,
            edge_type,
            dst: digest_col(dst)?,
            at: if at.is_empty() {
                None
            } else {
                Some(digest_col(at)?)
            },
        })
    }

    fn canonical_payload(payload: &Value) -> Result<String> {
        canonical_json_string(payload).map_err(|e| {
            KaiError::new(ErrorCode::InvalidCanonicalJson, "payload cannot be canonicalised")
                .with_source(e)
        })
    }

    fn log_insert(conn: &Connection, kind: NodeKind, id: &Digest, created_at: i64) -> Result<()> {
        conn.execute(
            "INSERT INTO logs (kind, seq, id, created_at)
             VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM logs WHERE kind = ?1), ?2, ?3)",
            params![kind.as_str(), id.as_bytes().as_slice(), created_at],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn put_node(
        conn: &Connection,
        kind: NodeKind,
        payload: &Value,
        created_at: i64,
    ) -> Result<PutNode> {
        let text = canonical_payload(payload)?;
        let id = node_id(kind, payload).map_err(|e| {
            KaiError::new(ErrorCode::InvalidCanonicalJson, "payload cannot be addressed")
                .with_source(e)
        })?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO nodes (id, kind, payload_text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.as_bytes().as_slice(), kind.as_str(), text, created_at],
            )
            .map_err(db_err)?
            > 0;
        if inserted {
            log_insert(conn, kind, &id, created_at)?;
        }
        Ok(PutNode { id, inserted })
    }

    pub fn put_identity_node(
        conn: &Connection,
        kind: NodeKind,
        payload: &Value,
        created_at: i64,
    ) -> Result<Digest> {
        if !kind.is_mutable_identity() {
            return Err(KaiError::new(
                ErrorCode::ImmutableKind,
                format!("{kind} is content-addressed, not mutable-identity"),
            ));
        }
        let text = canonical_payload(payload)?;
        let id = Digest::new_identity();
        conn.execute(
            "INSERT INTO nodes (id, kind, payload_text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id.as_bytes().as_slice(), kind.as_str(), text, created_at],
        )
        .map_err(db_err)?;
        log_insert(conn, kind, &id, created_at)?;
        Ok(id)
    }

    pub fn update_payload(conn: &Connection, id: &Digest, payload: &Value) -> Result<()> {
        let kind_text: Option<String> = conn
            .query_row(
                "SELECT kind FROM nodes WHERE id = ?1",
                params![id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(kind_text) = kind_text else {
            return Err(KaiError::node_not_found(id));
        };
        let kind = NodeKind::from_str(&kind_text)
            .map_err(|e| KaiError::new(ErrorCode::UnknownKind, e.to_string()))?;
        if !kind.is_mutable_identity() {
            return Err(KaiError::new(
                ErrorCode::ImmutableKind,
                format!("{kind} nodes are immutable"),
            ));
        }
        let text = canonical_payload(payload)?;
        conn.execute(
            "UPDATE nodes SET payload_text = ?2 WHERE id = ?1",
            params![id.as_bytes().as_slice(), text],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn node(conn: &Connection, id: &Digest) -> Result<Option<Node>> {
        conn.query_row(
            "SELECT kind, payload_text, created_at FROM nodes WHERE id = ?1",
            params![id.as_bytes().as_slice()],
            |row| {
                let kind_text: String = row.get(0)?;
                let payload_text: String = row.get(1)?;
                let created_at: i64 = row.get(2)?;
                Ok((kind_text, payload_text, created_at))
            },
        )
        .optional()
        .map_err(db_err)?
        .map(|(kind_text, payload_text, created_at)| {
            let kind = NodeKind::from_str(&kind_text)
                .map_err(|e| KaiError::new(ErrorCode::UnknownKind, e.to_string()))?;
            let payload: Value = serde_json::from_str(&payload_text)
                .map_err(|e| KaiError::internal("stored payload is not JSON").with_source(e))?;
            Ok(Node {
                id: *id,
                kind,
                payload,
                created_at,
            })
        })
        .transpose()
    }

    pub fn has_node(conn: &Connection, id: &Digest) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM nodes WHERE id = ?1",
                params![id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    pub fn nodes_by_kind(conn: &Connection, kind: NodeKind) -> Result<Vec<Node>> {
        let mut stmt = conn
            .prepare(
                "SELECT n.id, n.payload_text, n.created_at
                 FROM nodes n JOIN logs l ON l.id = n.id AND l.kind = n.kind
                 WHERE n.kind = ?1 ORDER BY l.seq",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                let id: Vec<u8> = row.get(0)?;
                let payload_text: String = row.get(1)?;
                let created_at: i64 = row.get(2)?;
                Ok((id, payload_text, created_at))
            })
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, payload_text, created_at) = row.map_err(db_err)?;
            let payload: Value = serde_json::from_str(&payload_text)
                .map_err(|e| KaiError::internal("stored payload is not JSON").with_source(e))?;
            out.push(Node {
                id: Digest::from_slice(&id)
                    .map_err(|e| KaiError::internal("stored id malformed").with_source(e))?,
                kind,
                payload,
                created_at,
            });
        }
        Ok(out)
    }

    pub fn raw_node_bytes(conn: &Connection, id: &Digest) -> Result<Option<Vec<u8>>> {
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT kind, payload_text FROM nodes WHERE id = ?1",
                params![id.as_bytes().as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        Ok(row.map(|(kind, payload_text)| {
            let mut bytes = Vec::with_capacity(kind.len() + 1 + payload_text.len());
            bytes.extend_from_slice(kind.as_bytes());
            bytes.push(b'\n');
            bytes.extend_from_slice(payload_text.as_bytes());
            bytes
        }))
    }

    pub fn put_edge(conn: &Connection, edge: &Edge, created_at: i64) -> Result<bool> {
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO edges (src, type, dst, at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    edge.src.as_bytes().as_slice(),
                    edge.edge_type.as_str(),
                    edge.dst.as_bytes().as_slice(),
                    at_bytes(edge.at.as_ref()),
                    created_at
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn delete_edge(conn: &Connection, edge: &Edge) -> Result<bool> {
        let changed = conn
            .execute(
                "DELETE FROM edges WHERE src = ?1 AND type = ?2 AND dst = ?3 AND at = ?4",
                params![
                    edge.src.as_bytes().as_slice(),
                    edge.edge_type.as_str(),
                    edge.dst.as_bytes().as_slice(),
                    at_bytes(edge.at.as_ref())
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    fn edge_query(
        conn: &Connection,
        where_clause: &str,
        bind: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Edge>> {
        let sql = format!(
            "SELECT src, type, dst, at FROM edges WHERE {where_clause} ORDER BY created_at, src, dst"
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(bind, |row| {
                let src: Vec<u8> = row.get(0)?;
                let type_text: String = row.get(1)?;
                let dst: Vec<u8> = row.get(2)?;
                let at: Vec<u8> = row.get(3)?;
                row_to_edge(src, type_text, dst, at)
            })
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    pub fn edges_from(
        conn: &Connection,
        src: &Digest,
        edge_type: Option<EdgeType>,
    ) -> Result<Vec<Edge>> {
        let src_bytes = src.as_bytes().as_slice();
        match edge_type {
            Some(t) => edge_query(conn, "src = ?1 AND type = ?2", &[&src_bytes, &t.as_str()]),
            None => edge_query(conn, "src = ?1", &[&src_bytes]),
        }
    }

    pub fn edges_to(conn: &Connection, dst: &Digest, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let dst_bytes = dst.as_bytes().as_slice();
        edge_query(conn, "dst = ?1 AND type = ?2", &[&dst_bytes, &edge_type.as_str()])
    }

    pub fn edges_at(
        conn: &Connection,
        at: &Digest,
        edge_type: Option<EdgeType>,
    ) -> Result<Vec<Edge>> {
        let at_vec = at.as_bytes().to_vec();
        match edge_type {
            Some(t) => edge_query(conn, "at = ?1 AND type = ?2", &[&at_vec, &t.as_str()]),
            None => edge_query(conn, "at = ?1 AND at != x''", &[&at_vec]),
        }
    }

    pub fn edges_at_to(
        conn: &Connection,
        at: &Digest,
        edge_type: EdgeType,
        dst: &Digest,
    ) -> Result<Vec<Edge>> {
        let at_vec = at.as_bytes().to_vec();
        let dst_bytes = dst.as_bytes().as_slice();
        edge_query(
            conn,
            "at = ?1 AND type = ?2 AND dst = ?3",
            &[&at_vec, &edge_type.as_str(), &dst_bytes],
        )
    }

    pub fn publish_head(conn: &Connection) -> Result<Option<Digest>> {
        let row: Option<Vec<u8>> = conn
            .query_row(
                "SELECT id FROM node_publish ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        opt_digest_col(row).map_err(db_err)
    }

    pub fn publish_entries(
        conn: &Connection,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<PublishEntry>> {
        let mut stmt = conn
            .prepare(
                "SELECT seq, id, parent, time, actor, node_id, kind
                 FROM node_publish WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )
            .map_err(db_err)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![after_seq, limit], |row| {
                let seq: i64 = row.get(0)?;
                let id: Vec<u8> = row.get(1)?;
                let parent: Option<Vec<u8>> = row.get(2)?;
                let time: i64 = row.get(3)?;
                let actor: String = row.get(4)?;
                let node_id: Vec<u8> = row.get(5)?;
                let kind: String = row.get(6)?;
                Ok(PublishEntry {
                    seq,
                    id: digest_col(id)?,
                    parent: opt_digest_col(parent)?,
                    time,
                    actor,
                    node_id: digest_col(node_id)?,
                    kind,
                })
            })
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    fn row_to_ref(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Vec<u8>, String, i64, i64, Option<String>, Option<String>)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn build_ref(
        raw: (String, Vec<u8>, String, i64, i64, Option<String>, Option<String>),
    ) -> Result<RefEntry> {
        let (name, target, kind_text, created_at, updated_at, actor, push_id) = raw;
        Ok(RefEntry {
            name,
            target: Digest::from_slice(&target)
                .map_err(|e| KaiError::internal("stored ref target malformed").with_source(e))?,
            target_kind: NodeKind::from_str(&kind_text)
                .map_err(|e| KaiError::new(ErrorCode::UnknownKind, e.to_string()))?,
            created_at,
            updated_at,
            actor,
            push_id,
        })
    }

    pub fn ref_get(conn: &Connection, name: &str) -> Result<Option<RefEntry>> {
        conn.query_row(
            "SELECT name, target_id, target_kind, created_at, updated_at, actor, push_id
             FROM refs WHERE name = ?1",
            params![name],
            row_to_ref,
        )
        .optional()
        .map_err(db_err)?
        .map(build_ref)
        .transpose()
    }

    pub fn ref_list(conn: &Connection, prefix: Option<&str>) -> Result<Vec<RefEntry>> {
        let escaped = prefix
            .unwrap_or("")
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("{escaped}%");
        let mut stmt = conn
            .prepare(
                "SELECT name, target_id, target_kind, created_at, updated_at, actor, push_id
                 FROM refs WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map(params![pattern], row_to_ref).map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(build_ref(row.map_err(db_err)?)?);
        }
        Ok(out)
    }

    pub fn ref_upsert(
        conn: &Connection,
        name: &str,
        target: &Digest,
        target_kind: NodeKind,
        now: i64,
        actor: Option<&str>,
        push_id: Option<&str>,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO refs (name, target_id, target_kind, created_at, updated_at, actor, push_id)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                 target_id = excluded.target_id,
                 target_kind = excluded.target_kind,
                 updated_at = excluded.updated_at,
                 actor = excluded.actor,
                 push_id = excluded.push_id",
            params![
                name,
                target.as_bytes().as_slice(),
                target_kind.as_str(),
                now,
                actor,
                push_id
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn ref_delete(conn: &Connection, name: &str) -> Result<bool> {
        let changed = conn
            .execute("DELETE FROM refs WHERE name = ?1", params![name])
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn assign_slug(conn: &Connection, target: &Digest, slug: &str) -> Result<()> {
        let taken: Option<Vec<u8>> = conn
            .query_row(
                "SELECT target_id FROM slugs WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if let Some(existing) = taken {
            if existing != target.as_bytes().as_slice() {
                return Err(KaiError::new(
                    ErrorCode::RepoExists,
                    format!("slug already taken: {slug}"),
                ));
            }
        }
        conn.execute(
            "INSERT OR REPLACE INTO slugs (target_id, slug) VALUES (?1, ?2)",
            params![target.as_bytes().as_slice(), slug],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn resolve(conn: &Connection, text: &str) -> Result<Digest> {
        // Full hex id first.
        if text.len() == Digest::LEN * 2 {
            if let Ok(digest) = Digest::from_hex(text) {
                if has_node(conn, &digest)? {
                    return Ok(digest);
                }
            }
        }
        // Slug alias.
        let by_slug: Option<Vec<u8>> = conn
            .query_row(
                "SELECT target_id FROM slugs WHERE slug = ?1",
                params![text],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if let Some(bytes) = by_slug {
            return Digest::from_slice(&bytes)
                .map_err(|e| KaiError::internal("stored slug target malformed").with_source(e));
        }
        // Unique hex prefix.
        if text.len() >= 4 && text.len() % 2 == 0 && text.len() < Digest::LEN * 2 {
            if let Ok(prefix) = hex::decode(text) {
                let mut stmt = conn
                    .prepare("SELECT id FROM nodes WHERE id >= ?1 AND id < ?2 LIMIT 2")
                    .map_err(db_err)?;
                let mut upper = prefix.clone();
                // The exclusive upper bound is the prefix with its last byte
                // incremented (prefixes of 0xff..ff cannot occur for blake3
                // outputs in practice; fall back to a full scan if they do).
                let bounded = {
                    let mut i = upper.len();
                    loop {
                        if i == 0 {
                            break false;
                        }
                        i -= 1;
                        if upper[i] < 0xff {
                            upper[i] += 1;
                            upper.truncate(i + 1);
                            break true;
                        }
                    }
                };
                if bounded {
                    let rows = stmt
                        .query_map(params![prefix, upper], |row| row.get::<_, Vec<u8>>(0))
                        .map_err(db_err)?;
                    let mut matches = Vec::new();
                    for row in rows {
                        matches.push(row.map_err(db_err)?);
                    }
                    match matches.len() {
                        1 => {
                            return Digest::from_slice(&matches[0]).map_err(|e| {
                                KaiError::internal("stored id malformed").with_source(e)
                            });
                        }
                        n if n > 1 => {
                            return Err(KaiError::new(
                                ErrorCode::AmbiguousPrefix,
                                format!("prefix resolves to multiple nodes: {text}"),
                            ));
                        }
                        _ => {}
                    }
                }
            }
        }
        Err(KaiError::node_not_found(text))
    }

    // -- Ref history -----------------------------------------------------

    pub fn history_latest_for_ref(conn: &Connection, name: &str) -> Result<Option<Digest>> {
        let row: Option<Vec<u8>> = conn
            .query_row(
                "SELECT id FROM ref_history WHERE ref = ?1 ORDER BY seq DESC LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        opt_digest_col(row).map_err(db_err)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn history_append(
        conn: &Connection,
        id: &Digest,
        parent: Option<&Digest>,
        time: i64,
        actor: &str,
        ref_name: &str,
        old: Option<&Digest>,
        new: &Digest,
        meta: &Value,
    ) -> Result<i64> {
        let meta_text = canonical_payload(meta)?;
        conn.execute(
            "INSERT INTO ref_history (id, parent, time, actor, ref, \"old\", \"new\", meta_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id.as_bytes().as_slice(),
                parent.map(|d| d.as_bytes().to_vec()),
                time,
                actor,
                ref_name,
                old.map(|d| d.as_bytes().to_vec()),
                new.as_bytes().as_slice(),
                meta_text
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn history_head(conn: &Connection) -> Result<Option<Digest>> {
        let row: Option<Vec<u8>> = conn
            .query_row(
                "SELECT id FROM ref_history ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        opt_digest_col(row).map_err(db_err)
    }

    pub fn history_entries(
        conn: &Connection,
        ref_filter: Option<&str>,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let sql = match ref_filter {
            Some(_) => {
                "SELECT seq, id, parent, time, actor, ref, \"old\", \"new\", meta_text
                 FROM ref_history WHERE seq > ?1 AND ref = ?2 ORDER BY seq LIMIT ?3"
            }
            None => {
                "SELECT seq, id, parent, time, actor, ref, \"old\", \"new\", meta_text
                 FROM ref_history WHERE seq > ?1 ORDER BY seq LIMIT ?2"
            }
        };
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<HistoryEntry> {
            let seq: i64 = row.get(0)?;
            let id: Vec<u8> = row.get(1)?;
            let parent: Option<Vec<u8>> = row.get(2)?;
            let time: i64 = row.get(3)?;
            let actor: String = row.get(4)?;
            let ref_name: String = row.get(5)?;
            let old: Option<Vec<u8>> = row.get(6)?;
            let new: Vec<u8> = row.get(7)?;
            let meta_text: String = row.get(8)?;
            Ok(HistoryEntry {
                seq,
                id: digest_col(id)?,
                parent: opt_digest_col(parent)?,
                time,
                actor,
                ref_name,
                old: opt_digest_col(old)?,
                new: digest_col(new)?,
                meta: serde_json::from_str(&meta_text).unwrap_or(Value::Null),
            })
        };
        let rows = match ref_filter {
            Some(name) => stmt
                .query_map(params![after_seq, name, limit], map_row)
                .map_err(db_err)?,
            None => stmt
                .query_map(params![after_seq, limit], map_row)
                .map_err(db_err)?,
        };
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    // -- Node publish chain ----------------------------------------------

    pub fn publish_append(
        conn: &Connection,
        node_id: &Digest,
        kind: &str,
        actor: &str,
        time: i64,
    ) -> Result<i64> {
        let parent: Option<Vec<u8>> = conn
            .query_row(
                "SELECT id FROM node_publish ORDER BY seq DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let parent = opt_digest_col(parent).map_err(db_err)?;
        let meta = serde_json::json!({
            "parent": parent.as_ref().map(Digest::to_hex),
            "time": time,
            "actor": actor,
            "node": node_id.to_hex(),
            "kind": kind,
        });
        let id = Digest::of(&kai_core::canonical_json(&meta).map_err(|e| {
            KaiError::new(ErrorCode::InvalidCanonicalJson, "publish meta").with_source(e)
        })?);
        conn.execute(
            "INSERT INTO node_publish (id, parent, time, actor, node_id, kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.as_bytes().as_slice(),
                parent.map(|d| d.as_bytes().to_vec()),
                time,
                actor,
                node_id.as_bytes().as_slice(),
                kind
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    // -- Segments & objects ----------------------------------------------

    pub fn segment_insert(
        conn: &Connection,
        ts: i64,
        checksum: &Digest,
        size: u64,
        blob: &[u8],
    ) -> Result<i64> {
        conn.execute(
            "INSERT INTO segments (ts, checksum, size, blob) VALUES (?1, ?2, ?3, ?4)",
            params![
                ts,
                checksum.as_bytes().as_slice(),
                i64::try_from(size).map_err(|_| KaiError::internal("segment size overflow"))?,
                blob
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn object_index_put(
        conn: &Connection,
        digest: &Digest,
        segment_id: i64,
        off: u64,
        len: u64,
        kind: &str,
        created_at: i64,
    ) -> Result<bool> {
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO objects (digest, segment_id, off, len, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    digest.as_bytes().as_slice(),
                    segment_id,
                    i64::try_from(off).map_err(|_| KaiError::internal("offset overflow"))?,
                    i64::try_from(len).map_err(|_| KaiError::internal("length overflow"))?,
                    kind,
                    created_at
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn object_lookup(conn: &Connection, digest: &Digest) -> Result<Option<ObjectRef>> {
        conn.query_row(
            "SELECT segment_id, off, len, kind FROM objects WHERE digest = ?1",
            params![digest.as_bytes().as_slice()],
            |row| {
                let segment_id: i64 = row.get(0)?;
                let off: i64 = row.get(1)?;
                let len: i64 = row.get(2)?;
                let kind: String = row.get(3)?;
                Ok(ObjectRef {
                    segment_id,
                    off: off.max(0) as u64,
                    len: len.max(0) as u64,
                    kind,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    // -- Enrichment queue ------------------------------------------------

    pub fn enrich_enqueue(conn: &Connection, node_id: &Digest, kind: &str, now: i64) -> Result<i64> {
        conn.execute(
            "INSERT INTO enrich_queue (node_id, kind, status, created_at)
             VALUES (?1, ?2, 'pending', ?3)",
            params![node_id.as_bytes().as_slice(), kind, now],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn enrich_claim(conn: &Connection, now: i64) -> Result<Option<EnrichTask>> {
        // SELECT + UPDATE inside the caller's transaction prevents double
        // dispatch: the write transaction serialises claimants.
        let row: Option<(i64, Vec<u8>, String)> = conn
            .query_row(
                "SELECT id, node_id, kind FROM enrich_queue
                 WHERE status = 'pending' ORDER BY id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;
        let Some((id, node_id, kind)) = row else {
            return Ok(None);
        };
        conn.execute(
            "UPDATE enrich_queue SET status = 'processing', started_at = ?2 WHERE id = ?1",
            params![id, now],
        )
        .map_err(db_err)?;
        Ok(Some(EnrichTask {
            id,
            node_id: Digest::from_slice(&node_id)
                .map_err(|e| KaiError::internal("stored queue id malformed").with_source(e))?,
            kind,
        }))
    }

    /// Every node id in the store (GC mark/sweep support).
    pub fn all_node_ids(conn: &Connection) -> Result<Vec<Digest>> {
        let mut stmt = conn.prepare("SELECT id FROM nodes").map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(
                Digest::from_slice(&row.map_err(db_err)?)
                    .map_err(|e| KaiError::internal("stored id malformed").with_source(e))?,
            );
        }
        Ok(out)
    }

    pub fn enrich_finish(
        conn: &Connection,
        task_id: i64,
        now: i64,
        error: Option<&str>,
    ) -> Result<()> {
        let status = if error.is_some() { "failed" } else { "done" };
        conn.execute(
            "UPDATE enrich_queue SET status = ?2, finished_at = ?3, error = ?4 WHERE id = ?1",
            params![task_id, status, now, error],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GraphStore: history / publish / enrich conveniences
// ---------------------------------------------------------------------------

impl GraphStore {
    /// Id of the globally latest ref-history entry.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn history_head(&self) -> Result<Option<Digest>> {
        {
            let guard = self.lock()?;
            sql::history_head(&guard)
        }
    }

    /// History entries strictly after `after_seq`, ascending, capped.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn history_entries(
        &self,
        ref_filter: Option<&str>,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        {
            let guard = self.lock()?;
            sql::history_entries(&guard, ref_filter, after_seq, limit)
        }
    }

    /// Edges scoped at `at` of one type pointing at `dst`.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn edges_at_to(
        &self,
        at: &Digest,
        edge_type: EdgeType,
        dst: &Digest,
    ) -> Result<Vec<Edge>> {
        {
            let guard = self.lock()?;
            sql::edges_at_to(&guard, at, edge_type, dst)
        }
    }

    /// Id of the latest node-publish entry.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn publish_head(&self) -> Result<Option<Digest>> {
        {
            let guard = self.lock()?;
            sql::publish_head(&guard)
        }
    }

    /// Node-publish entries strictly after `after_seq`, ascending, capped.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn publish_entries(&self, after_seq: i64, limit: usize) -> Result<Vec<PublishEntry>> {
        {
            let guard = self.lock()?;
            sql::publish_entries(&guard, after_seq, limit)
        }
    }
}
