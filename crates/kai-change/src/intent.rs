// SPDX-License-Identifier: MIT OR Apache-2.0
//! Intent generation capability.
//!
//! True natural-language generation is an external collaborator; the core
//! only depends on this trait. [`TemplateIntentGenerator`] renders a
//! deterministic summary from the stored evidence, which is what the
//! enrichment worker uses by default.

use kai_core::{Digest, EdgeType, NodeKind};
use kai_error::{KaiError, Result};
use kai_store::GraphStore;
use std::collections::BTreeMap;

/// Renders an intent sentence for a changeset.
pub trait IntentGenerator: Send + Sync {
    /// Produce the intent text for `changeset_id`.
    ///
    /// `override_text` wins outright; `force_regenerate` asks the
    /// implementation to ignore any cached result.
    ///
    /// # Errors
    ///
    /// `node_not_found` when the changeset is absent.
    fn render(
        &self,
        store: &GraphStore,
        changeset_id: &Digest,
        override_text: Option<&str>,
        force_regenerate: bool,
    ) -> Result<String>;
}

/// Deterministic template renderer: counts change categories and names the
/// touched files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateIntentGenerator;

impl IntentGenerator for TemplateIntentGenerator {
    fn render(
        &self,
        store: &GraphStore,
        changeset_id: &Digest,
        override_text: Option<&str>,
        _force_regenerate: bool,
    ) -> Result<String> {
        if let Some(text) = override_text {
            return Ok(text.to_string());
        }

        let node = store
            .node(changeset_id)?
            .filter(|n| n.kind == NodeKind::ChangeSet)
            .ok_or_else(|| KaiError::node_not_found(changeset_id))?;

        let mut categories: BTreeMap<String, usize> = BTreeMap::new();
        let mut files: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for edge in store.edges_from(changeset_id, Some(EdgeType::Has))? {
            if let Some(ct) = store.node(&edge.dst)? {
                if let Some(category) = ct.payload.get("category").and_then(|v| v.as_str()) {
                    *categories.entry(category.to_string()).or_insert(0) += 1;
                }
                if let Some(list) = ct.payload.pointer("/evidence/files").and_then(|v| v.as_array())
                {
                    for f in list {
                        if let Some(path) = f.as_str() {
                            files.insert(path.to_string());
                        }
                    }
                }
            }
        }

        if categories.is_empty() {
            let title = node.payload.get("title").and_then(|v| v.as_str()).unwrap_or("");
            return Ok(if title.is_empty() {
                "No classified changes.".to_string()
            } else {
                format!("{title}: no classified changes.")
            });
        }

        let summary = categories
            .iter()
            .map(|(cat, count)| format!("{count} {cat}"))
            .collect::<Vec<_>>()
            .join(", ");
        let file_list = files.into_iter().collect::<Vec<_>>().join(", ");
        Ok(format!("Changes: {summary} across {file_list}."))
    }
}
