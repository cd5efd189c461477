// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-store
//!
//! Embedded relational graph store for kailab: typed nodes and edges,
//! named refs, per-kind insertion logs, content blobs (loose on the
//! client, pack segments on the server), the hash-chained audit tables,
//! the enrichment queue, and mark-and-sweep garbage collection.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod gc;
mod retry;
mod schema;
mod store;

pub use gc::{GcReport, collect};
pub use store::{
    CLIENT_DB, EnrichTask, GraphStore, KAI_DIR, OBJECTS_DIR, ObjectRef, PublishEntry, PutNode,
    SERVER_DB, StoreProfile, StoreTx,
};

use kai_error::{ErrorCode, KaiError};

/// Map a `rusqlite` error into the kailab taxonomy. Lock contention becomes
/// the retryable `database_busy`; everything else is internal with the
/// cause attached.
pub(crate) fn db_err(err: rusqlite::Error) -> KaiError {
    if let rusqlite::Error::SqliteFailure(code, _) = &err {
        if matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return KaiError::new(ErrorCode::DatabaseBusy, "database is busy").with_source(err);
        }
    }
    KaiError::internal("database error").with_source(err)
}
