// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for kailab.
//!
//! Every kailab error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. The code determines the [`ErrorKind`]
//! family and the HTTP status a server boundary maps it to.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, KaiError>;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The graph store has not been initialised (client-side only).
    NotInitialized,
    /// A referenced entity does not exist.
    NotFound,
    /// The request conflicts with current state.
    Conflict,
    /// The input is malformed or exceeds a limit.
    InvalidInput,
    /// Stored or transferred data failed verification.
    Integrity,
    /// Retryable infrastructure condition.
    Transient,
    /// The operation was cancelled before commit.
    Cancelled,
    /// The operation exceeded its deadline.
    TimedOut,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotInitialized => "not_initialized",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidInput => "invalid_input",
            Self::Integrity => "integrity",
            Self::Transient => "transient",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a lowercase `snake_case` string that is the
/// wire form in API error bodies (e.g. `"ref_mismatch"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No `.kai` store in the working directory.
    NotInitialized,

    // -- NotFound --
    /// Node id does not resolve.
    NodeNotFound,
    /// Ref name does not resolve.
    RefNotFound,
    /// Object digest does not resolve.
    ObjectNotFound,
    /// Segment id does not resolve.
    SegmentNotFound,
    /// (tenant, repo) pair does not resolve.
    RepoNotFound,

    // -- Conflict --
    /// Ref update is not a fast-forward.
    RefMismatch,
    /// Repository already exists.
    RepoExists,
    /// A short id prefix resolves to multiple nodes.
    AmbiguousPrefix,
    /// Mutation attempted on a non-active workspace.
    WorkspaceClosed,
    /// In-place update attempted on a content-addressed node.
    ImmutableKind,

    // -- InvalidInput --
    /// Digest text failed to parse.
    MalformedDigest,
    /// Pack header failed structural validation.
    MalformedPack,
    /// Pack exceeds the configured size limit.
    PackTooLarge,
    /// Payload could not be canonicalised.
    InvalidCanonicalJson,
    /// Node or edge kind string is not recognised.
    UnknownKind,
    /// Ref name violates the naming rules.
    InvalidRefName,
    /// A glob or matcher pattern failed to compile.
    InvalidPattern,
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Integrity --
    /// Recomputed digest differs from the declared one.
    DigestMismatch,
    /// A committed payload references a digest that is not stored.
    MissingDigest,

    // -- Transient --
    /// The database is locked by another writer.
    DatabaseBusy,

    // -- Cancelled / TimedOut --
    /// The operation was cancelled.
    Cancelled,
    /// The operation timed out.
    TimedOut,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorKind`] this code belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotInitialized => ErrorKind::NotInitialized,

            Self::NodeNotFound
            | Self::RefNotFound
            | Self::ObjectNotFound
            | Self::SegmentNotFound
            | Self::RepoNotFound => ErrorKind::NotFound,

            Self::RefMismatch
            | Self::RepoExists
            | Self::AmbiguousPrefix
            | Self::WorkspaceClosed
            | Self::ImmutableKind => ErrorKind::Conflict,

            Self::MalformedDigest
            | Self::MalformedPack
            | Self::PackTooLarge
            | Self::InvalidCanonicalJson
            | Self::UnknownKind
            | Self::InvalidRefName
            | Self::InvalidPattern
            | Self::ConfigInvalid => ErrorKind::InvalidInput,

            Self::DigestMismatch | Self::MissingDigest => ErrorKind::Integrity,

            Self::DatabaseBusy => ErrorKind::Transient,

            Self::Cancelled => ErrorKind::Cancelled,
            Self::TimedOut => ErrorKind::TimedOut,

            Self::Internal => ErrorKind::Internal,
        }
    }

    /// Stable `&'static str` wire form (e.g. `"ref_mismatch"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::NodeNotFound => "node_not_found",
            Self::RefNotFound => "ref_not_found",
            Self::ObjectNotFound => "object_not_found",
            Self::SegmentNotFound => "segment_not_found",
            Self::RepoNotFound => "repo_not_found",
            Self::RefMismatch => "ref_mismatch",
            Self::RepoExists => "repo_exists",
            Self::AmbiguousPrefix => "ambiguous_prefix",
            Self::WorkspaceClosed => "workspace_closed",
            Self::ImmutableKind => "immutable_kind",
            Self::MalformedDigest => "malformed_digest",
            Self::MalformedPack => "malformed_pack",
            Self::PackTooLarge => "pack_too_large",
            Self::InvalidCanonicalJson => "invalid_canonical_json",
            Self::UnknownKind => "unknown_kind",
            Self::InvalidRefName => "invalid_ref_name",
            Self::InvalidPattern => "invalid_pattern",
            Self::ConfigInvalid => "config_invalid",
            Self::DigestMismatch => "digest_mismatch",
            Self::MissingDigest => "missing_digest",
            Self::DatabaseBusy => "database_busy",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Internal => "internal",
        }
    }

    /// HTTP status the server boundary maps this code to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::PackTooLarge => 413,
            _ => match self.kind() {
                ErrorKind::NotFound => 404,
                ErrorKind::Conflict => 409,
                ErrorKind::InvalidInput | ErrorKind::Integrity => 400,
                ErrorKind::TimedOut => 504,
                ErrorKind::NotInitialized
                | ErrorKind::Transient
                | ErrorKind::Cancelled
                | ErrorKind::Internal => 500,
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// KaiError
// ---------------------------------------------------------------------------

/// Unified kailab error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
pub struct KaiError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl KaiError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.kind()`.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// `true` when a retry with backoff may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    // -- Convenience constructors --------------------------------------------

    /// A `node_not_found` error for the given id text.
    pub fn node_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NodeNotFound, format!("node not found: {id}"))
    }

    /// A `ref_not_found` error.
    pub fn ref_not_found(name: impl fmt::Display) -> Self {
        Self::new(ErrorCode::RefNotFound, format!("ref not found: {name}"))
    }

    /// An `object_not_found` error.
    pub fn object_not_found(digest: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ObjectNotFound, format!("object not found: {digest}"))
    }

    /// A `ref_mismatch` conflict.
    pub fn ref_mismatch(name: impl fmt::Display) -> Self {
        Self::new(ErrorCode::RefMismatch, format!("ref is not fast-forward: {name}"))
    }

    /// An unexpected internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Debug for KaiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("KaiError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for KaiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for KaiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`KaiError`] (without the opaque source),
/// used as the HTTP error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Error code.
    pub error: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&KaiError> for ErrorBody {
    fn from(err: &KaiError) -> Self {
        Self {
            error: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::NotInitialized,
        ErrorCode::NodeNotFound,
        ErrorCode::RefNotFound,
        ErrorCode::ObjectNotFound,
        ErrorCode::SegmentNotFound,
        ErrorCode::RepoNotFound,
        ErrorCode::RefMismatch,
        ErrorCode::RepoExists,
        ErrorCode::AmbiguousPrefix,
        ErrorCode::WorkspaceClosed,
        ErrorCode::ImmutableKind,
        ErrorCode::MalformedDigest,
        ErrorCode::MalformedPack,
        ErrorCode::PackTooLarge,
        ErrorCode::InvalidCanonicalJson,
        ErrorCode::UnknownKind,
        ErrorCode::InvalidRefName,
        ErrorCode::InvalidPattern,
        ErrorCode::ConfigInvalid,
        ErrorCode::DigestMismatch,
        ErrorCode::MissingDigest,
        ErrorCode::DatabaseBusy,
        ErrorCode::Cancelled,
        ErrorCode::TimedOut,
        ErrorCode::Internal,
    ];

    #[test]
    fn display_includes_code_and_message() {
        let err = KaiError::new(ErrorCode::RefMismatch, "expected old target");
        assert_eq!(err.to_string(), "[ref_mismatch] expected old target");
    }

    #[test]
    fn context_is_deterministic_in_display() {
        let err = KaiError::new(ErrorCode::DigestMismatch, "bad object")
            .with_context("index", 2)
            .with_context("declared", "abcd");
        let s = err.to_string();
        assert!(s.contains("\"declared\""));
        assert!(s.contains("\"index\""));
    }

    #[test]
    fn source_chain_preserved() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "missing file");
        let err = KaiError::new(ErrorCode::ObjectNotFound, "blob").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "missing file");
    }

    #[test]
    fn unique_wire_strings() {
        let mut seen = std::collections::HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()), "duplicate: {code}");
        }
    }

    #[test]
    fn serde_matches_as_str() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ErrorCode::NodeNotFound.http_status(), 404);
        assert_eq!(ErrorCode::RepoNotFound.http_status(), 404);
        assert_eq!(ErrorCode::RefMismatch.http_status(), 409);
        assert_eq!(ErrorCode::RepoExists.http_status(), 409);
        assert_eq!(ErrorCode::MalformedPack.http_status(), 400);
        assert_eq!(ErrorCode::DigestMismatch.http_status(), 400);
        assert_eq!(ErrorCode::PackTooLarge.http_status(), 413);
        assert_eq!(ErrorCode::Internal.http_status(), 500);
    }

    #[test]
    fn transient_detection() {
        assert!(KaiError::new(ErrorCode::DatabaseBusy, "busy").is_transient());
        assert!(!KaiError::new(ErrorCode::Internal, "boom").is_transient());
    }

    #[test]
    fn error_body_serialises_lowercase_code() {
        let err = KaiError::ref_mismatch("snap.main");
        let body = ErrorBody::from(&err);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "ref_mismatch");
    }
}
