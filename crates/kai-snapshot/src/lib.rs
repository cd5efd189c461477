// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-snapshot
//!
//! Ingests a file source into an immutable Snapshot node: content blobs,
//! File nodes, `HAS_FILE` edges, optional per-snapshot Symbol nodes, and
//! the ephemeral `snap.working` / `snap.latest` refs.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod lang;
mod source;
mod symbols;

pub use builder::{SnapshotBuilder, SnapshotOptions, SnapshotOutcome};
pub use lang::lang_for_path;
pub use source::{DirSource, FileSource, GitSource, MemSource, SourceFile};
pub use symbols::{NullExtractor, RawSymbol, SimpleFunctionExtractor, SymbolExtractor};
