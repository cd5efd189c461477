// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP client for a kailab server repository.

use crate::proto::{
    ACTOR_HEADER, BatchUpdateRequest, BatchUpdateResponse, DIGEST_HEADER, IngestResponse,
    KIND_HEADER, NegotiateRequest, NegotiateResponse, RefInfo, RefListResponse, RefPutRequest,
    RefPutResponse,
};
use kai_core::{Digest, RefUpdate};
use kai_error::{ErrorCode, KaiError, Result};
use serde::Deserialize;

/// Client for one `(tenant, repo)` on a kailab server.
#[derive(Clone, Debug)]
pub struct RemoteClient {
    base: String,
    tenant: String,
    repo: String,
    actor: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct WireError {
    error: Option<ErrorCode>,
    message: Option<String>,
}

impl RemoteClient {
    /// A client for `{base_url}/{tenant}/{repo}/v1`, acting as `actor`.
    pub fn new(
        base_url: impl Into<String>,
        tenant: impl Into<String>,
        repo: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            base: base_url.into().trim_end_matches('/').to_string(),
            tenant: tenant.into(),
            repo: repo.into(),
            actor: actor.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}/{}/v1/{suffix}", self.base, self.tenant, self.repo)
    }

    async fn fail(response: reqwest::Response) -> KaiError {
        let status = response.status();
        match response.json::<WireError>().await {
            Ok(body) => KaiError::new(
                body.error.unwrap_or(ErrorCode::Internal),
                body.message
                    .unwrap_or_else(|| format!("server returned {status}")),
            ),
            Err(_) => KaiError::internal(format!("server returned {status}")),
        }
    }

    fn transport(err: reqwest::Error) -> KaiError {
        KaiError::internal("http transport failure").with_source(err)
    }

    /// `POST …/push/negotiate`: which of `digests` the server lacks.
    ///
    /// # Errors
    ///
    /// Transport failures or server-side errors.
    pub async fn negotiate(&self, digests: &[Digest]) -> Result<Vec<Digest>> {
        let response = self
            .http
            .post(self.url("push/negotiate"))
            .json(&NegotiateRequest {
                digests: digests.to_vec(),
            })
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let body: NegotiateResponse = response.json().await.map_err(Self::transport)?;
        Ok(body.missing)
    }

    /// `POST …/objects/pack`: ingest a compressed pack.
    ///
    /// # Errors
    ///
    /// Transport failures; `digest_mismatch` / `pack_too_large` / `malformed_pack`
    /// from the server reject the whole pack.
    pub async fn send_pack(&self, pack: Vec<u8>) -> Result<IngestResponse> {
        let response = self
            .http
            .post(self.url("objects/pack"))
            .header(ACTOR_HEADER, &self.actor)
            .header(reqwest::header::CONTENT_TYPE, "application/zstd")
            .body(pack)
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        response.json().await.map_err(Self::transport)
    }

    /// `GET …/objects/{digest}`: raw object bytes plus declared kind.
    ///
    /// # Errors
    ///
    /// `object_not_found` when absent; `digest_mismatch` when the body does
    /// not re-hash to the requested digest.
    pub async fn get_object(&self, digest: &Digest) -> Result<(String, Vec<u8>)> {
        let response = self
            .http
            .get(self.url(&format!("objects/{}", digest.to_hex())))
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let kind = response
            .headers()
            .get(KIND_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let declared = response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(Self::transport)?.to_vec();

        let actual = Digest::of(&bytes);
        if actual != *digest || declared.as_deref().is_some_and(|d| d != actual.to_hex()) {
            return Err(KaiError::new(
                ErrorCode::DigestMismatch,
                "fetched object does not match its digest",
            ));
        }
        Ok((kind, bytes))
    }

    /// `GET …/refs?prefix=`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub async fn list_refs(&self, prefix: Option<&str>) -> Result<Vec<RefInfo>> {
        let mut request = self.http.get(self.url("refs"));
        if let Some(prefix) = prefix {
            request = request.query(&[("prefix", prefix)]);
        }
        let response = request.send().await.map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let body: RefListResponse = response.json().await.map_err(Self::transport)?;
        Ok(body.refs)
    }

    /// `GET …/refs/{name}`.
    ///
    /// # Errors
    ///
    /// Transport or server failures; an absent ref is `Ok(None)`.
    pub async fn get_ref(&self, name: &str) -> Result<Option<RefInfo>> {
        let response = self
            .http
            .get(self.url(&format!("refs/{name}")))
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        response.json().await.map(Some).map_err(Self::transport)
    }

    /// `PUT …/refs/{name}`: single fast-forward (or forced) update.
    ///
    /// # Errors
    ///
    /// `ref_mismatch` on a non-fast-forward update.
    pub async fn put_ref(
        &self,
        name: &str,
        old: Option<&Digest>,
        new: &Digest,
        force: bool,
    ) -> Result<RefPutResponse> {
        let response = self
            .http
            .put(self.url(&format!("refs/{name}")))
            .header(ACTOR_HEADER, &self.actor)
            .json(&RefPutRequest {
                old: old.copied(),
                new: *new,
                force,
            })
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        response.json().await.map_err(Self::transport)
    }

    /// `POST …/refs/batch`: atomic batch with per-entry results.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub async fn batch_update(&self, updates: Vec<RefUpdate>) -> Result<BatchUpdateResponse> {
        let response = self
            .http
            .post(self.url("refs/batch"))
            .header(ACTOR_HEADER, &self.actor)
            .json(&BatchUpdateRequest { updates })
            .send()
            .await
            .map_err(Self::transport)?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        response.json().await.map_err(Self::transport)
    }
}
