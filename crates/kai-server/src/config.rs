// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server configuration: defaults, TOML loading, and validation.

use kai_error::{ErrorCode, KaiError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime settings for the kailab server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory holding `<tenant>/<repo>/kailab.db` stores.
    pub data_root: PathBuf,
    /// Bind address.
    pub bind: String,
    /// Maximum accepted pack size (compressed and decompressed), MiB.
    pub max_pack_mib: u64,
    /// Outermost per-request timeout, seconds.
    pub request_timeout_secs: u64,
    /// Enrichment worker poll interval, milliseconds.
    pub worker_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./kailab-data"),
            bind: "127.0.0.1:8910".to_string(),
            max_pack_mib: 100,
            request_timeout_secs: 30,
            worker_poll_ms: 500,
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// `invalid_input` when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            KaiError::new(
                ErrorCode::ConfigInvalid,
                format!("cannot read config {}", path.display()),
            )
            .with_source(e)
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| {
            KaiError::new(ErrorCode::ConfigInvalid, "config file is not valid TOML")
                .with_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation.
    ///
    /// # Errors
    ///
    /// `invalid_input` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.max_pack_mib == 0 {
            problems.push("max_pack_mib must be positive".to_string());
        }
        if self.max_pack_mib > 4096 {
            problems.push("max_pack_mib above 4096 is not supported".to_string());
        }
        if self.request_timeout_secs == 0 {
            problems.push("request_timeout_secs must be positive".to_string());
        }
        if self.worker_poll_ms == 0 {
            problems.push("worker_poll_ms must be positive".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(
                KaiError::new(ErrorCode::ConfigInvalid, "config validation failed")
                    .with_context("problems", problems),
            )
        }
    }

    /// Maximum pack size in bytes.
    #[must_use]
    pub fn max_pack_bytes(&self) -> usize {
        (self.max_pack_mib as usize) * 1024 * 1024
    }

    /// Pack parsing limits derived from this config.
    #[must_use]
    pub fn pack_limits(&self) -> kai_pack::PackLimits {
        kai_pack::PackLimits {
            max_decompressed: self.max_pack_bytes(),
            max_header: kai_pack::MAX_HEADER_LEN,
        }
    }
}
