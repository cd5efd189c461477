// SPDX-License-Identifier: MIT OR Apache-2.0
//! Database schema and connection setup.
//!
//! The absent edge context is stored as an empty blob rather than NULL:
//! NULLs never compare equal inside a composite primary key, which would
//! defeat edge idempotence.

use kai_error::Result;
use rusqlite::Connection;

use crate::db_err;

/// Tables shared by client and server stores.
const CORE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id          BLOB PRIMARY KEY,
    kind        TEXT NOT NULL,
    payload_text TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS edges (
    src         BLOB NOT NULL,
    type        TEXT NOT NULL,
    dst         BLOB NOT NULL,
    at          BLOB NOT NULL DEFAULT x'',
    created_at  INTEGER NOT NULL,
    PRIMARY KEY (src, type, dst, at)
);
CREATE INDEX IF NOT EXISTS idx_edges_src  ON edges(src);
CREATE INDEX IF NOT EXISTS idx_edges_dst  ON edges(dst);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(type);
CREATE INDEX IF NOT EXISTS idx_edges_at   ON edges(at);

CREATE TABLE IF NOT EXISTS refs (
    name        TEXT PRIMARY KEY,
    target_id   BLOB NOT NULL,
    target_kind TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    actor       TEXT,
    push_id     TEXT
);

CREATE TABLE IF NOT EXISTS slugs (
    target_id   BLOB PRIMARY KEY,
    slug        TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS logs (
    kind        TEXT NOT NULL,
    seq         INTEGER NOT NULL,
    id          BLOB NOT NULL,
    created_at  INTEGER NOT NULL,
    PRIMARY KEY (kind, seq)
);
";

/// Additional tables for the server profile: pack segments, the object
/// index into them, the append-only audit logs, and the enrichment queue.
const SERVER_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS segments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts          INTEGER NOT NULL,
    checksum    BLOB NOT NULL,
    size        INTEGER NOT NULL,
    blob        BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS objects (
    digest      BLOB PRIMARY KEY,
    segment_id  INTEGER NOT NULL REFERENCES segments(id),
    off         INTEGER NOT NULL,
    len         INTEGER NOT NULL,
    kind        TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ref_history (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          BLOB NOT NULL,
    parent      BLOB,
    time        INTEGER NOT NULL,
    actor       TEXT NOT NULL,
    ref         TEXT NOT NULL,
    \"old\"     BLOB,
    \"new\"     BLOB NOT NULL,
    meta_text   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ref_history_ref ON ref_history(ref);

CREATE TABLE IF NOT EXISTS node_publish (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          BLOB NOT NULL,
    parent      BLOB,
    time        INTEGER NOT NULL,
    actor       TEXT NOT NULL,
    node_id     BLOB NOT NULL,
    kind        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrich_queue (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id     BLOB NOT NULL,
    kind        TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    created_at  INTEGER NOT NULL,
    started_at  INTEGER,
    finished_at INTEGER,
    error       TEXT
);
CREATE INDEX IF NOT EXISTS idx_enrich_status ON enrich_queue(status);
";

/// Apply connection pragmas: WAL journalling, a 5 s busy timeout, and
/// foreign-key enforcement.
pub(crate) fn configure(conn: &Connection) -> Result<()> {
    // journal_mode and busy_timeout echo a result row, so they go through
    // execute_batch rather than pragma_update.
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA busy_timeout=5000;
         PRAGMA foreign_keys=ON;
         PRAGMA synchronous=NORMAL;",
    )
    .map_err(db_err)?;
    Ok(())
}

/// Create all tables for the given profile. Idempotent.
pub(crate) fn migrate(conn: &Connection, server: bool) -> Result<()> {
    conn.execute_batch(CORE_SCHEMA).map_err(db_err)?;
    if server {
        conn.execute_batch(SERVER_SCHEMA).map_err(db_err)?;
    }
    Ok(())
}
