// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-server
//!
//! The multi-tenant kailab server: per-(tenant, repo) store registry,
//! pack ingest, the refs + history HTTP API, and the background
//! enrichment worker.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod config;
mod enrich;
mod ingest;
mod registry;

pub use api::{AppState, build_router, now_millis};
pub use config::ServerConfig;
pub use enrich::{EnrichmentJobs, process_one, spawn_worker};
pub use ingest::{IngestReceipt, ingest_pack};
pub use registry::{RepoHandle, RepoLease, RepoRegistry};
