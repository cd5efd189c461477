// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reviews over changesets.
//!
//! A Review is a mutable-identity node pointing at a changeset through a
//! `REVIEW_OF` edge; comments are content-addressed nodes hung off it with
//! `HAS_COMMENT` edges, optionally anchored to a symbol or file.

use kai_core::{
    Digest, Edge, EdgeType, NodeKind, ReviewCommentPayload, ReviewPayload, ReviewStatus,
};
use kai_error::{ErrorCode, KaiError, Result};
use kai_store::GraphStore;
use tracing::info;

/// Manages Review nodes over a [`GraphStore`].
pub struct ReviewManager<'a> {
    store: &'a GraphStore,
}

impl<'a> ReviewManager<'a> {
    /// A manager over `store`.
    #[must_use]
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Open a review of `changeset`.
    ///
    /// # Errors
    ///
    /// `node_not_found` when the changeset is absent.
    pub fn create(&self, changeset: &Digest, author: &str, now: i64) -> Result<Digest> {
        let cs = self
            .store
            .node(changeset)?
            .filter(|n| n.kind == NodeKind::ChangeSet)
            .ok_or_else(|| KaiError::node_not_found(changeset))?;

        let payload = ReviewPayload {
            change_set: cs.id.to_hex(),
            author: author.to_string(),
            status: ReviewStatus::Open,
            created_at: now,
            updated_at: now,
        };
        let id = self.store.with_tx(|tx| {
            let id = tx.put_identity_node(NodeKind::Review, &payload.to_value(), now)?;
            tx.put_edge(&Edge::new(id, EdgeType::ReviewOf, cs.id), now)?;
            Ok(id)
        })?;
        info!(review = %id.short(), changeset = %cs.id.short(), "review opened");
        Ok(id)
    }

    /// Add a comment, optionally anchored to a symbol or file node.
    ///
    /// # Errors
    ///
    /// `node_not_found` when the review is absent, `workspace_closed` when
    /// it is already resolved.
    pub fn add_comment(
        &self,
        review: &Digest,
        author: &str,
        body: &str,
        anchor: Option<&Digest>,
        now: i64,
    ) -> Result<Digest> {
        let payload = self.load(review)?;
        if payload.status == ReviewStatus::Resolved {
            return Err(KaiError::new(
                ErrorCode::WorkspaceClosed,
                "review is resolved",
            ));
        }

        let comment = ReviewCommentPayload {
            review: review.to_hex(),
            author: author.to_string(),
            body: body.to_string(),
            created_at: now,
        };
        self.store.with_tx(|tx| {
            let put = tx.put_node(NodeKind::ReviewComment, &comment.to_value(), now)?;
            tx.put_edge(&Edge::new(*review, EdgeType::HasComment, put.id), now)?;
            if let Some(anchor) = anchor {
                tx.put_edge(&Edge::new(put.id, EdgeType::AnchorsTo, *anchor), now)?;
            }
            Ok(put.id)
        })
    }

    /// Resolve the review. Terminal.
    ///
    /// # Errors
    ///
    /// `node_not_found` when absent.
    pub fn resolve(&self, review: &Digest, now: i64) -> Result<()> {
        let mut payload = self.load(review)?;
        payload.status = ReviewStatus::Resolved;
        payload.updated_at = now;
        self.store.update_payload(review, &payload.to_value())
    }

    /// Load a review payload.
    ///
    /// # Errors
    ///
    /// `node_not_found` when absent or not a Review.
    pub fn load(&self, review: &Digest) -> Result<ReviewPayload> {
        let node = self
            .store
            .node(review)?
            .filter(|n| n.kind == NodeKind::Review)
            .ok_or_else(|| KaiError::node_not_found(review))?;
        serde_json::from_value(node.payload)
            .map_err(|e| KaiError::internal("stored review payload malformed").with_source(e))
    }

    /// Comment ids of a review, in insertion order.
    ///
    /// # Errors
    ///
    /// Database failures only.
    pub fn comments(&self, review: &Digest) -> Result<Vec<Digest>> {
        Ok(self
            .store
            .edges_from(review, Some(EdgeType::HasComment))?
            .into_iter()
            .map(|e| e.dst)
            .collect())
    }
}
