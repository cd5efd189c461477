// SPDX-License-Identifier: MIT OR Apache-2.0
//! The snapshot builder: ingest a file source into a Snapshot node plus
//! File nodes, content blobs, and (optionally) per-snapshot Symbol nodes.

use crate::source::{FileSource, SourceFile};
use crate::symbols::SymbolExtractor;
use kai_core::{
    Digest, Edge, EdgeType, FilePayload, NodeKind, SNAP_LATEST, SNAP_WORKING, SnapshotFileEntry,
    SnapshotPayload, SymbolPayload,
};
use kai_error::{KaiError, Result};
use kai_refs::RefRegistry;
use kai_store::GraphStore;
use tracing::{info, warn};

/// Options for one build.
#[derive(Clone, Debug)]
pub struct SnapshotOptions {
    /// Optional human description recorded in the payload.
    pub description: Option<String>,
    /// Payload timestamp, epoch milliseconds. Supplied by the caller so
    /// builds are reproducible under test.
    pub created_at: i64,
    /// Whether to point `snap.working` / `snap.latest` at the result.
    pub update_refs: bool,
}

impl SnapshotOptions {
    /// Options with the given timestamp, refs updated, no description.
    #[must_use]
    pub fn at(created_at: i64) -> Self {
        Self {
            description: None,
            created_at,
            update_refs: true,
        }
    }
}

/// Result of a build.
#[derive(Clone, Debug)]
pub struct SnapshotOutcome {
    /// Id of the Snapshot node.
    pub snapshot_id: Digest,
    /// Number of files captured.
    pub file_count: u64,
    /// `false` when an identical snapshot already existed.
    pub created: bool,
    /// Number of Symbol nodes extracted.
    pub symbol_count: usize,
    /// Duplicate-path and extraction warnings.
    pub warnings: Vec<String>,
}

/// Builds snapshots into a [`GraphStore`].
pub struct SnapshotBuilder<'a> {
    store: &'a GraphStore,
    extractor: Option<&'a dyn SymbolExtractor>,
}

impl<'a> SnapshotBuilder<'a> {
    /// A builder without symbol extraction.
    #[must_use]
    pub fn new(store: &'a GraphStore) -> Self {
        Self {
            store,
            extractor: None,
        }
    }

    /// Attach a symbol extractor; parseable files then grow Symbol nodes
    /// with snapshot-scoped `DEFINES_IN` edges.
    #[must_use]
    pub fn with_extractor(mut self, extractor: &'a dyn SymbolExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Deduplicate and byte-wise path-sort a source's files. On duplicate
    /// paths the later file wins and a warning is surfaced.
    ///
    /// # Errors
    ///
    /// Propagates source I/O failures.
    pub fn collect_files(source: &dyn FileSource) -> Result<(Vec<SourceFile>, Vec<String>)> {
        let mut warnings = Vec::new();
        let mut by_path: std::collections::BTreeMap<String, SourceFile> =
            std::collections::BTreeMap::new();
        for file in source.files()? {
            if by_path.contains_key(&file.path) {
                warnings.push(format!("duplicate path {:?}: later write wins", file.path));
            }
            by_path.insert(file.path.clone(), file);
        }
        Ok((by_path.into_values().collect(), warnings))
    }

    /// The `(path, content digest)` manifest a source would produce,
    /// without writing anything. Used to detect no-op stages.
    ///
    /// # Errors
    ///
    /// Propagates source I/O failures.
    pub fn manifest_digests(source: &dyn FileSource) -> Result<Vec<(String, Digest)>> {
        let (files, _) = Self::collect_files(source)?;
        Ok(files
            .iter()
            .map(|f| (f.path.clone(), Digest::of(&f.content)))
            .collect())
    }

    /// Build the snapshot.
    ///
    /// Writes content blobs, inserts File nodes, the Snapshot node, and
    /// `HAS_FILE` edges; with an extractor attached, also Symbol nodes and
    /// snapshot-scoped `DEFINES_IN` edges. Optionally rotates the
    /// ephemeral refs.
    ///
    /// # Errors
    ///
    /// Source, filesystem, or database failures abort the build; the graph
    /// transaction rolls back as a unit.
    pub fn build(&self, source: &dyn FileSource, opts: &SnapshotOptions) -> Result<SnapshotOutcome> {
        let (files, mut warnings) = Self::collect_files(source)?;
        for warning in &warnings {
            warn!(source = %source.identifier(), "{warning}");
        }

        // Content blobs land before the graph transaction; blob writes are
        // idempotent and harmless if the transaction later rolls back.
        let mut planned: Vec<(SourceFile, Digest, FilePayload)> = Vec::with_capacity(files.len());
        for file in files {
            let content_digest = self.store.write_object(&file.content)?;
            let payload = FilePayload {
                path: file.path.clone(),
                lang: file.lang.clone().unwrap_or_default(),
                digest: content_digest.to_hex(),
                size: file.content.len() as u64,
                created_at: opts.created_at,
            };
            planned.push((file, content_digest, payload));
        }

        let extractor = self.extractor;
        let source_type = source.source_type().to_string();
        let source_ref = source.identifier();
        let created_at = opts.created_at;
        let description = opts.description.clone();

        let (snapshot_id, created, symbol_count) = self.store.with_tx(|tx| {
            let mut entries = Vec::with_capacity(planned.len());
            let mut file_ids = Vec::with_capacity(planned.len());
            for (file, content_digest, payload) in &planned {
                let put = tx.put_node(NodeKind::File, &payload.to_value(), created_at)?;
                file_ids.push(put.id);
                entries.push(SnapshotFileEntry {
                    path: file.path.clone(),
                    lang: payload.lang.clone(),
                    digest: put.id.to_hex(),
                    content_digest: content_digest.to_hex(),
                });
            }

            let snapshot = SnapshotPayload {
                source_type: source_type.clone(),
                source_ref: source_ref.clone(),
                file_count: entries.len() as u64,
                description: description.clone(),
                files: entries,
                created_at,
            };
            let put = tx.put_node(NodeKind::Snapshot, &snapshot.to_value(), created_at)?;

            for file_id in &file_ids {
                tx.put_edge(&Edge::new(put.id, EdgeType::HasFile, *file_id), created_at)?;
            }

            let mut symbol_count = 0;
            if let Some(extractor) = extractor {
                for ((file, _, payload), file_id) in planned.iter().zip(&file_ids) {
                    let Some(lang) = file.lang.as_deref() else {
                        continue;
                    };
                    for raw in extractor.extract(lang, &file.content) {
                        let symbol = SymbolPayload {
                            name: raw.name,
                            kind: raw.kind,
                            file: payload.path.clone(),
                            range: raw.range,
                            signature: raw.signature,
                            snapshot_id: put.id.to_hex(),
                        };
                        let sym = tx.put_node(NodeKind::Symbol, &symbol.to_value(), created_at)?;
                        tx.put_edge(
                            &Edge::scoped(sym.id, EdgeType::DefinesIn, *file_id, put.id),
                            created_at,
                        )?;
                        symbol_count += 1;
                    }
                }
            }

            Ok((put.id, put.inserted, symbol_count))
        })?;

        if opts.update_refs {
            let refs = RefRegistry::new(self.store);
            refs.force_set(SNAP_WORKING, &snapshot_id, "local", "", created_at)?;
            refs.force_set(SNAP_LATEST, &snapshot_id, "local", "", created_at)?;
        }

        info!(
            snapshot = %snapshot_id.short(),
            files = planned.len(),
            symbols = symbol_count,
            created,
            "snapshot built"
        );

        warnings.shrink_to_fit();
        Ok(SnapshotOutcome {
            snapshot_id,
            file_count: planned.len() as u64,
            created,
            symbol_count,
            warnings,
        })
    }

    /// Load a snapshot payload back out of the store.
    ///
    /// # Errors
    ///
    /// `node_not_found` when absent or not a Snapshot.
    pub fn load(store: &GraphStore, id: &Digest) -> Result<SnapshotPayload> {
        let node = store
            .node(id)?
            .filter(|n| n.kind == NodeKind::Snapshot)
            .ok_or_else(|| KaiError::node_not_found(id))?;
        serde_json::from_value(node.payload)
            .map_err(|e| KaiError::internal("stored snapshot payload malformed").with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemSource;
    use crate::symbols::SimpleFunctionExtractor;
    use kai_store::StoreProfile;
    use tempfile::TempDir;

    fn repo_store() -> (TempDir, GraphStore) {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::init_repo(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn empty_source_builds_the_fixture_snapshot() {
        let store = GraphStore::open_in_memory(StoreProfile::Client).unwrap();
        let source = MemSource::new("");
        let outcome = SnapshotBuilder::new(&store)
            .build(&source, &SnapshotOptions {
                description: None,
                created_at: 0,
                update_refs: false,
            })
            .unwrap();

        // Literal expected id from the canonical empty payload.
        let expected = Digest::of(
            b"Snapshot\n{\"createdAt\":0,\"fileCount\":0,\"files\":[],\"sourceRef\":\"\",\"sourceType\":\"mem\"}",
        );
        assert_eq!(outcome.snapshot_id, expected);
        assert_eq!(outcome.file_count, 0);
        assert!(outcome.created);

        // Building again is a no-op returning the same id.
        let again = SnapshotBuilder::new(&store)
            .build(&source, &SnapshotOptions {
                description: None,
                created_at: 0,
                update_refs: false,
            })
            .unwrap();
        assert_eq!(again.snapshot_id, expected);
        assert!(!again.created);
    }

    #[test]
    fn files_are_sorted_and_linked() {
        let (_dir, store) = repo_store();
        let source = MemSource::new("fixture")
            .with_file("b.js", b"let b = 2;")
            .with_file("a.js", b"let a = 1;");
        let outcome = SnapshotBuilder::new(&store)
            .build(&source, &SnapshotOptions::at(0))
            .unwrap();

        let snapshot = SnapshotBuilder::load(&store, &outcome.snapshot_id).unwrap();
        let paths: Vec<&str> = snapshot.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.js", "b.js"]);
        assert_eq!(snapshot.file_count, 2);

        // HAS_FILE edges point at both File nodes.
        let edges = store
            .edges_from(&outcome.snapshot_id, Some(EdgeType::HasFile))
            .unwrap();
        assert_eq!(edges.len(), 2);

        // Snapshot closure: every content digest is readable.
        for entry in &snapshot.files {
            let digest = Digest::from_hex(&entry.content_digest).unwrap();
            assert!(store.object_bytes(&digest).unwrap().is_some());
        }
    }

    #[test]
    fn duplicate_paths_warn_and_later_wins() {
        let (_dir, store) = repo_store();
        let source = MemSource::new("dup")
            .with_file("a.js", b"old")
            .with_file("a.js", b"new");
        let outcome = SnapshotBuilder::new(&store)
            .build(&source, &SnapshotOptions::at(0))
            .unwrap();

        assert_eq!(outcome.file_count, 1);
        assert_eq!(outcome.warnings.len(), 1);
        let snapshot = SnapshotBuilder::load(&store, &outcome.snapshot_id).unwrap();
        assert_eq!(
            snapshot.files[0].content_digest,
            Digest::of(b"new").to_hex()
        );
    }

    #[test]
    fn extractor_produces_scoped_symbols() {
        let (_dir, store) = repo_store();
        let source =
            MemSource::new("sym").with_file("auth.js", b"function login(u) {\n  return u;\n}\n");
        let extractor = SimpleFunctionExtractor;
        let outcome = SnapshotBuilder::new(&store)
            .with_extractor(&extractor)
            .build(&source, &SnapshotOptions::at(0))
            .unwrap();

        assert_eq!(outcome.symbol_count, 1);
        let scoped = store
            .edges_at(&outcome.snapshot_id, Some(EdgeType::DefinesIn))
            .unwrap();
        assert_eq!(scoped.len(), 1);

        let symbol = store.node(&scoped[0].src).unwrap().unwrap();
        assert_eq!(symbol.kind, NodeKind::Symbol);
        assert_eq!(symbol.payload["name"], "login");
        assert_eq!(symbol.payload["snapshotId"], outcome.snapshot_id.to_hex());
    }

    #[test]
    fn ephemeral_refs_follow_the_latest_build() {
        let (_dir, store) = repo_store();
        let one = SnapshotBuilder::new(&store)
            .build(&MemSource::new("a").with_file("a.js", b"1"), &SnapshotOptions::at(1))
            .unwrap();
        let two = SnapshotBuilder::new(&store)
            .build(&MemSource::new("a").with_file("a.js", b"2"), &SnapshotOptions::at(2))
            .unwrap();
        assert_ne!(one.snapshot_id, two.snapshot_id);

        let latest = store.ref_get(SNAP_LATEST).unwrap().unwrap();
        assert_eq!(latest.target, two.snapshot_id);
        let working = store.ref_get(SNAP_WORKING).unwrap().unwrap();
        assert_eq!(working.target, two.snapshot_id);
    }
}
