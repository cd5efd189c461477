// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire DTOs shared by the sync client and the HTTP server.
//!
//! Digest fields travel as lowercase hex strings (the `Digest` serde
//! form); timestamps are epoch milliseconds.

use kai_core::{Digest, HistoryEntry, RefUpdate, RefUpdateResult};
use serde::{Deserialize, Serialize};

/// Actor header name on mutating requests.
pub const ACTOR_HEADER: &str = "X-Kailab-Actor";
/// Object kind response header.
pub const KIND_HEADER: &str = "X-Kailab-Kind";
/// Object digest response header.
pub const DIGEST_HEADER: &str = "X-Kailab-Digest";

/// `POST …/push/negotiate` request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NegotiateRequest {
    /// Digests the client intends to push.
    pub digests: Vec<Digest>,
}

/// `POST …/push/negotiate` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NegotiateResponse {
    /// The subset the server lacks.
    pub missing: Vec<Digest>,
}

/// `POST …/objects/pack` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    /// Row id of the stored segment.
    pub segment_id: i64,
    /// Number of objects indexed.
    pub indexed: usize,
}

/// A ref as listed by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefInfo {
    /// Ref name.
    pub name: String,
    /// Target digest.
    pub target: Digest,
    /// Last update, epoch milliseconds.
    pub updated_at: i64,
    /// Last updating actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// `GET …/refs` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefListResponse {
    /// Matching refs, sorted by name.
    pub refs: Vec<RefInfo>,
}

/// `PUT …/refs/{name}` request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefPutRequest {
    /// Expected current target; absent asserts the ref does not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Digest>,
    /// New target.
    pub new: Digest,
    /// Bypass the fast-forward check.
    #[serde(default)]
    pub force: bool,
}

/// `PUT …/refs/{name}` success response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefPutResponse {
    /// Always `true` on the success path.
    pub ok: bool,
    /// Server-assigned push id.
    pub push_id: String,
    /// Update time, epoch milliseconds.
    pub updated_at: i64,
}

/// `POST …/refs/batch` request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchUpdateRequest {
    /// Updates to apply atomically.
    pub updates: Vec<RefUpdate>,
}

/// `POST …/refs/batch` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResponse {
    /// Server-assigned push id.
    pub push_id: String,
    /// Per-entry outcomes, in request order.
    pub results: Vec<RefUpdateResult>,
}

/// `GET …/log/head` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogHeadResponse {
    /// Id of the globally latest history entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<Digest>,
}

/// `GET …/log/entries` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntriesResponse {
    /// Entries in ascending `seq`.
    pub entries: Vec<HistoryEntry>,
}

/// One manifest row in `GET …/files/{ref}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListingEntry {
    /// Path.
    pub path: String,
    /// File node id, hex.
    pub digest: String,
    /// Content digest, hex.
    pub content_digest: String,
    /// Language tag.
    pub lang: String,
}

/// `GET …/files/{ref}` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListingResponse {
    /// Digest of the resolved snapshot.
    pub snapshot_digest: Digest,
    /// Manifest rows (optionally filtered by path).
    pub files: Vec<FileListingEntry>,
}

/// `GET …/content/{digest}` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentResponse {
    /// Path recorded on the owning File node, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Content digest, hex.
    pub digest: Digest,
    /// Base64-encoded content bytes.
    pub content: String,
    /// Language tag, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_serialise_as_hex() {
        let req = NegotiateRequest {
            digests: vec![Digest::of(b"x")],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["digests"][0], Digest::of(b"x").to_hex());
    }

    #[test]
    fn ingest_response_is_camel_case() {
        let json = serde_json::to_value(IngestResponse {
            segment_id: 7,
            indexed: 3,
        })
        .unwrap();
        assert_eq!(json["segmentId"], 7);
        assert_eq!(json["indexed"], 3);
    }

    #[test]
    fn ref_put_request_omits_absent_old() {
        let req = RefPutRequest {
            old: None,
            new: Digest::of(b"t"),
            force: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("\"old\""));
    }
}
