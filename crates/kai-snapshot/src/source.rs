// SPDX-License-Identifier: MIT OR Apache-2.0
//! File sources.
//!
//! A `FileSource` hands the snapshot builder `(path, bytes, lang?)`
//! triples; the builder never cares where they came from. The directory
//! walker and the git-ref reader are the production implementations, the
//! in-memory source serves tests and staging.

use crate::lang::lang_for_path;
use kai_error::{KaiError, Result};
use std::path::PathBuf;
use std::process::Command;
use walkdir::WalkDir;

/// One file yielded by a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    /// Repository-relative path, `/`-separated.
    pub path: String,
    /// Raw content bytes.
    pub content: Vec<u8>,
    /// Language tag, when detectable.
    pub lang: Option<String>,
}

impl SourceFile {
    /// Build a file with the language inferred from the path.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let path = path.into();
        let lang = lang_for_path(&path).map(str::to_string);
        Self {
            path,
            content: content.into(),
            lang,
        }
    }
}

/// Capability the snapshot builder consumes.
pub trait FileSource {
    /// Human-readable identifier (directory path, git ref, …).
    fn identifier(&self) -> String;
    /// Source family tag recorded in the snapshot payload
    /// (`"dir"`, `"git"`, `"mem"`).
    fn source_type(&self) -> &str;
    /// Every file in scope.
    ///
    /// # Errors
    ///
    /// Implementation-specific I/O failures.
    fn files(&self) -> Result<Vec<SourceFile>>;
}

// ---------------------------------------------------------------------------
// DirSource
// ---------------------------------------------------------------------------

/// Walks a directory tree, skipping `.git` and `.kai`.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    /// A source over the tree rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSource for DirSource {
    fn identifier(&self) -> String {
        self.root.display().to_string()
    }

    fn source_type(&self) -> &str {
        "dir"
    }

    fn files(&self) -> Result<Vec<SourceFile>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name();
                name != std::ffi::OsStr::new(".git") && name != std::ffi::OsStr::new(".kai")
            });
        for entry in walker {
            let entry =
                entry.map_err(|e| KaiError::internal("walk source directory").with_source(e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let abs = entry.path();
            let rel = abs.strip_prefix(&self.root).unwrap_or(abs);
            let path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let content = std::fs::read(abs).map_err(|e| {
                KaiError::internal(format!("read {}", abs.display())).with_source(e)
            })?;
            out.push(SourceFile::new(path, content));
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// GitSource
// ---------------------------------------------------------------------------

/// Reads a committed tree out of a git repository via the git CLI.
#[derive(Debug, Clone)]
pub struct GitSource {
    repo_root: PathBuf,
    git_ref: String,
}

impl GitSource {
    /// A source over `git_ref` (e.g. `HEAD`, a branch, a commit) in the
    /// repository at `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>, git_ref: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            git_ref: git_ref.into(),
        }
    }

    fn run_git(&self, args: &[&str]) -> Result<Vec<u8>> {
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| KaiError::internal(format!("run git {args:?}")).with_source(e))?;
        if !out.status.success() {
            return Err(KaiError::internal(format!(
                "git {:?} failed (code={:?}): {}",
                args,
                out.status.code(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(out.stdout)
    }
}

impl FileSource for GitSource {
    fn identifier(&self) -> String {
        self.git_ref.clone()
    }

    fn source_type(&self) -> &str {
        "git"
    }

    fn files(&self) -> Result<Vec<SourceFile>> {
        let listing = self.run_git(&["ls-tree", "-r", "--name-only", "-z", &self.git_ref])?;
        let mut out = Vec::new();
        for raw_path in listing.split(|&b| b == 0).filter(|p| !p.is_empty()) {
            let path = String::from_utf8_lossy(raw_path).into_owned();
            let spec = format!("{}:{}", self.git_ref, path);
            let content = self.run_git(&["show", &spec])?;
            out.push(SourceFile::new(path, content));
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// MemSource
// ---------------------------------------------------------------------------

/// An in-memory source, used by tests and by staging (merged file sets).
#[derive(Debug, Clone, Default)]
pub struct MemSource {
    name: String,
    files: Vec<SourceFile>,
}

impl MemSource {
    /// An empty in-memory source labelled `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: Vec::new(),
        }
    }

    /// Add a file, inferring the language from the path.
    #[must_use]
    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push(SourceFile::new(path, content));
        self
    }

    /// Add an already-constructed file.
    #[must_use]
    pub fn with_source_file(mut self, file: SourceFile) -> Self {
        self.files.push(file);
        self
    }
}

impl FileSource for MemSource {
    fn identifier(&self) -> String {
        self.name.clone()
    }

    fn source_type(&self) -> &str {
        "mem"
    }

    fn files(&self) -> Result<Vec<SourceFile>> {
        Ok(self.files.clone())
    }
}
