// SPDX-License-Identifier: MIT OR Apache-2.0
//! kailab
//!
//! Content-addressed semantic version control: an immutable graph of
//! typed nodes over SQLite, a pack-based sync protocol, and a
//! multi-tenant server. This crate re-exports the workspace members under
//! stable module names; the integration tests in `tests/` exercise the
//! whole stack end to end.
#![deny(unsafe_code)]

pub use kai_change as change;
pub use kai_core as core;
pub use kai_error as error;
pub use kai_glob as glob;
pub use kai_pack as pack;
pub use kai_refs as refs;
pub use kai_server as server;
pub use kai_snapshot as snapshot;
pub use kai_store as store;
pub use kai_sync as sync;
pub use kai_workspace as workspace;
