// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-(tenant, repo) handle registry.
//!
//! Each handle owns one server-profile [`GraphStore`], lazily opened on
//! first reference. The map is guarded by a read-write lock; leases carry
//! an atomic reference count so a handle is only retired when idle.

use crate::config::ServerConfig;
use kai_error::{ErrorCode, KaiError, Result};
use kai_store::{GraphStore, SERVER_DB};
use std::collections::HashMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

/// One open repository.
pub struct RepoHandle {
    tenant: String,
    repo: String,
    store: GraphStore,
    active: AtomicUsize,
}

impl RepoHandle {
    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Owning tenant.
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Repository name.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Current lease count.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// A counted lease on a [`RepoHandle`]; dropping it releases the handle.
pub struct RepoLease {
    handle: Arc<RepoHandle>,
}

impl RepoLease {
    fn new(handle: Arc<RepoHandle>) -> Self {
        handle.active.fetch_add(1, Ordering::SeqCst);
        Self { handle }
    }
}

impl Deref for RepoLease {
    type Target = RepoHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for RepoLease {
    fn drop(&mut self) {
        self.handle.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry of open repositories under one data root.
pub struct RepoRegistry {
    root: PathBuf,
    handles: RwLock<HashMap<(String, String), Arc<RepoHandle>>>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        && name != "."
        && name != ".."
}

impl RepoRegistry {
    /// A registry rooted at the config's data root.
    ///
    /// # Errors
    ///
    /// Fails when the data root cannot be created.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_root)
            .map_err(|e| KaiError::internal("create data root").with_source(e))?;
        Ok(Self {
            root: config.data_root.clone(),
            handles: RwLock::new(HashMap::new()),
        })
    }

    fn repo_dir(&self, tenant: &str, repo: &str) -> PathBuf {
        self.root.join(tenant).join(repo)
    }

    fn validate_pair(tenant: &str, repo: &str) -> Result<()> {
        if valid_name(tenant) && valid_name(repo) {
            Ok(())
        } else {
            Err(KaiError::new(
                ErrorCode::RepoNotFound,
                format!("invalid repository name: {tenant}/{repo}"),
            ))
        }
    }

    /// Create a repository. Fails when it already exists.
    ///
    /// # Errors
    ///
    /// `repo_exists`, or storage failures.
    pub fn create(&self, tenant: &str, repo: &str) -> Result<Arc<RepoHandle>> {
        Self::validate_pair(tenant, repo)?;
        let dir = self.repo_dir(tenant, repo);
        if dir.exists() {
            return Err(KaiError::new(
                ErrorCode::RepoExists,
                format!("repository exists: {tenant}/{repo}"),
            ));
        }
        let handle = self.open_handle(tenant, repo)?;
        info!(tenant, repo, "repository created");
        Ok(handle)
    }

    /// Get a handle, lazily opening the store on first reference.
    ///
    /// # Errors
    ///
    /// `repo_not_found` when the repository does not exist on disk.
    pub fn get(&self, tenant: &str, repo: &str) -> Result<Arc<RepoHandle>> {
        Self::validate_pair(tenant, repo)?;
        let key = (tenant.to_string(), repo.to_string());
        {
            let map = self
                .handles
                .read()
                .map_err(|_| KaiError::internal("registry lock poisoned"))?;
            if let Some(handle) = map.get(&key) {
                return Ok(Arc::clone(handle));
            }
        }
        if !self.repo_dir(tenant, repo).join(SERVER_DB).exists() {
            return Err(KaiError::new(
                ErrorCode::RepoNotFound,
                format!("repository not found: {tenant}/{repo}"),
            ));
        }
        self.open_handle(tenant, repo)
    }

    /// Acquire a counted lease on a repository.
    ///
    /// # Errors
    ///
    /// Same as [`RepoRegistry::get`].
    pub fn acquire(&self, tenant: &str, repo: &str) -> Result<RepoLease> {
        Ok(RepoLease::new(self.get(tenant, repo)?))
    }

    fn open_handle(&self, tenant: &str, repo: &str) -> Result<Arc<RepoHandle>> {
        let mut map = self
            .handles
            .write()
            .map_err(|_| KaiError::internal("registry lock poisoned"))?;
        let key = (tenant.to_string(), repo.to_string());
        if let Some(handle) = map.get(&key) {
            return Ok(Arc::clone(handle));
        }
        let store = GraphStore::open_server(&self.repo_dir(tenant, repo).join(SERVER_DB))?;
        let handle = Arc::new(RepoHandle {
            tenant: tenant.to_string(),
            repo: repo.to_string(),
            store,
            active: AtomicUsize::new(0),
        });
        map.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// All repositories on disk, optionally filtered by tenant, sorted.
    ///
    /// # Errors
    ///
    /// Filesystem failures.
    pub fn list(&self, tenant: Option<&str>) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for t in self.list_tenants()? {
            if tenant.is_some_and(|want| want != t) {
                continue;
            }
            let tenant_dir = self.root.join(&t);
            let entries = std::fs::read_dir(&tenant_dir)
                .map_err(|e| KaiError::internal("list tenant dir").with_source(e))?;
            for entry in entries {
                let entry =
                    entry.map_err(|e| KaiError::internal("read tenant dir").with_source(e))?;
                if entry.path().join(SERVER_DB).exists() {
                    out.push((t.clone(), entry.file_name().to_string_lossy().into_owned()));
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// All tenants on disk, sorted.
    ///
    /// # Errors
    ///
    /// Filesystem failures.
    pub fn list_tenants(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| KaiError::internal("list data root").with_source(e))?;
        for entry in entries {
            let entry = entry.map_err(|e| KaiError::internal("read data root").with_source(e))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    /// Delete a repository. Refuses while leases are outstanding.
    ///
    /// # Errors
    ///
    /// `repo_not_found` when absent, conflict while the handle is busy.
    pub fn delete(&self, tenant: &str, repo: &str) -> Result<()> {
        Self::validate_pair(tenant, repo)?;
        let key = (tenant.to_string(), repo.to_string());
        let mut map = self
            .handles
            .write()
            .map_err(|_| KaiError::internal("registry lock poisoned"))?;
        if let Some(handle) = map.get(&key) {
            if handle.active() > 0 {
                return Err(KaiError::new(
                    ErrorCode::RepoExists,
                    format!("repository is busy: {tenant}/{repo}"),
                ));
            }
            map.remove(&key);
        }
        let dir = self.repo_dir(tenant, repo);
        if !dir.exists() {
            return Err(KaiError::new(
                ErrorCode::RepoNotFound,
                format!("repository not found: {tenant}/{repo}"),
            ));
        }
        std::fs::remove_dir_all(&dir)
            .map_err(|e| KaiError::internal("remove repository").with_source(e))?;
        // Prune the tenant directory when it just became empty.
        let tenant_dir = self.root.join(tenant);
        if std::fs::read_dir(&tenant_dir)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false)
        {
            let _ = std::fs::remove_dir(&tenant_dir);
        }
        info!(tenant, repo, "repository deleted");
        Ok(())
    }

    /// Snapshot of the currently open handles (for the enrichment worker).
    #[must_use]
    pub fn open_handles(&self) -> Vec<Arc<RepoHandle>> {
        self.handles
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }
}
