// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change classification.
//!
//! A classifier turns a modified file's before/after bytes into detected
//! symbol-level changes. Classifiers are registered per language; anything
//! they cannot handle degrades to a single `FILE_CONTENT_CHANGED` at the
//! engine level, never a failed changeset.

use kai_core::{ChangeCategory, SymbolKind};
use kai_error::Result;
use kai_snapshot::{RawSymbol, SymbolExtractor};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One detected change, before symbol names are resolved to node ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectedChange {
    /// Stable category.
    pub category: ChangeCategory,
    /// Names of the symbols involved (resolved to ids by the engine).
    pub symbols: Vec<String>,
    /// Relevant before-text.
    pub before: Option<String>,
    /// Relevant after-text.
    pub after: Option<String>,
}

impl DetectedChange {
    fn sig(category: ChangeCategory, name: &str, before: Option<&str>, after: Option<&str>) -> Self {
        Self {
            category,
            symbols: vec![name.to_string()],
            before: before.map(str::to_string),
            after: after.map(str::to_string),
        }
    }
}

/// Per-language structural change detection.
pub trait ChangeClassifier: Send + Sync {
    /// Detect symbol-level changes between two versions of `path`.
    /// Returning an empty vec means "no structural difference found".
    ///
    /// # Errors
    ///
    /// A failing classifier degrades that file to `FILE_CONTENT_CHANGED`;
    /// it never fails the changeset.
    fn detect_changes(
        &self,
        path: &str,
        before: &[u8],
        after: &[u8],
    ) -> Result<Vec<DetectedChange>>;
}

/// Registry of classifiers keyed by language tag.
#[derive(Default)]
pub struct ClassifierRegistry {
    by_lang: BTreeMap<String, Arc<dyn ChangeClassifier>>,
}

impl ClassifierRegistry {
    /// An empty registry: every modified file degrades to
    /// `FILE_CONTENT_CHANGED`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a classifier for one language.
    pub fn register(&mut self, lang: impl Into<String>, classifier: Arc<dyn ChangeClassifier>) {
        self.by_lang.insert(lang.into(), classifier);
    }

    /// Classifier for a language, if registered.
    #[must_use]
    pub fn get(&self, lang: &str) -> Option<&Arc<dyn ChangeClassifier>> {
        self.by_lang.get(lang)
    }

    /// Registry with [`SymbolDiffClassifier`]s for the scripting languages
    /// the built-in extractor understands.
    #[must_use]
    pub fn with_default_script_langs(extractor: Arc<dyn SymbolExtractor>) -> Self {
        let mut registry = Self::new();
        for lang in ["javascript", "typescript", "python"] {
            registry.register(
                lang,
                Arc::new(SymbolDiffClassifier::new(lang, Arc::clone(&extractor))),
            );
        }
        registry
    }
}

impl std::fmt::Debug for ClassifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierRegistry")
            .field("langs", &self.by_lang.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SymbolDiffClassifier
// ---------------------------------------------------------------------------

/// Classifier that compares extracted symbol tables.
///
/// Category rules:
/// - a function present on one side only → `FUNCTION_ADDED` / `FUNCTION_REMOVED`
/// - a function whose signature changed → `API_SURFACE_CHANGED`
/// - a function whose body changed on a branching line → `CONDITION_CHANGED`
/// - a function whose body changed otherwise → `FUNCTION_MODIFIED`
/// - a variable whose declaration changed → `CONSTANT_UPDATED`
/// - class/interface changes → `API_SURFACE_CHANGED`
pub struct SymbolDiffClassifier {
    lang: String,
    extractor: Arc<dyn SymbolExtractor>,
}

impl SymbolDiffClassifier {
    /// A classifier for `lang` backed by `extractor`.
    pub fn new(lang: impl Into<String>, extractor: Arc<dyn SymbolExtractor>) -> Self {
        Self {
            lang: lang.into(),
            extractor,
        }
    }

    fn body_text(content: &str, symbol: &RawSymbol) -> String {
        let start = symbol.range.start[0] as usize;
        let end = symbol.range.end[0] as usize;
        content
            .lines()
            .skip(start)
            .take(end.saturating_sub(start) + 1)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn body_change_category(before_body: &str, after_body: &str) -> ChangeCategory {
        let before_lines: Vec<&str> = before_body.lines().collect();
        let after_lines: Vec<&str> = after_body.lines().collect();
        let changed_line_is_branch = after_lines
            .iter()
            .filter(|line| !before_lines.contains(*line))
            .chain(before_lines.iter().filter(|line| !after_lines.contains(*line)))
            .any(|line| {
                let t = line.trim_start();
                t.starts_with("if ")
                    || t.starts_with("if(")
                    || t.starts_with("while ")
                    || t.starts_with("while(")
                    || t.starts_with("case ")
                    || t.starts_with("elif ")
                    || t.starts_with("else if")
            });
        if changed_line_is_branch {
            ChangeCategory::ConditionChanged
        } else {
            ChangeCategory::FunctionModified
        }
    }
}

impl ChangeClassifier for SymbolDiffClassifier {
    fn detect_changes(
        &self,
        _path: &str,
        before: &[u8],
        after: &[u8],
    ) -> Result<Vec<DetectedChange>> {
        let before_syms = self.extractor.extract(&self.lang, before);
        let after_syms = self.extractor.extract(&self.lang, after);
        if before_syms.is_empty() && after_syms.is_empty() {
            return Ok(Vec::new());
        }

        let before_text = String::from_utf8_lossy(before).into_owned();
        let after_text = String::from_utf8_lossy(after).into_owned();

        let before_map: BTreeMap<&str, &RawSymbol> =
            before_syms.iter().map(|s| (s.name.as_str(), s)).collect();
        let after_map: BTreeMap<&str, &RawSymbol> =
            after_syms.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut out = Vec::new();

        for (name, sym) in &after_map {
            match before_map.get(name) {
                None => {
                    let category = match sym.kind {
                        SymbolKind::Function => ChangeCategory::FunctionAdded,
                        _ => ChangeCategory::ApiSurfaceChanged,
                    };
                    out.push(DetectedChange::sig(category, name, None, Some(&sym.signature)));
                }
                Some(prev) => {
                    if prev.signature != sym.signature {
                        let category = match sym.kind {
                            SymbolKind::Variable => ChangeCategory::ConstantUpdated,
                            _ => ChangeCategory::ApiSurfaceChanged,
                        };
                        out.push(DetectedChange::sig(
                            category,
                            name,
                            Some(&prev.signature),
                            Some(&sym.signature),
                        ));
                    } else if sym.kind == SymbolKind::Function {
                        let before_body = Self::body_text(&before_text, prev);
                        let after_body = Self::body_text(&after_text, sym);
                        if before_body != after_body {
                            out.push(DetectedChange::sig(
                                Self::body_change_category(&before_body, &after_body),
                                name,
                                None,
                                None,
                            ));
                        }
                    }
                }
            }
        }

        for (name, sym) in &before_map {
            if !after_map.contains_key(name) {
                let category = match sym.kind {
                    SymbolKind::Function => ChangeCategory::FunctionRemoved,
                    _ => ChangeCategory::ApiSurfaceChanged,
                };
                out.push(DetectedChange::sig(category, name, Some(&sym.signature), None));
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_snapshot::SimpleFunctionExtractor;

    fn classifier() -> SymbolDiffClassifier {
        SymbolDiffClassifier::new("javascript", Arc::new(SimpleFunctionExtractor))
    }

    #[test]
    fn detects_added_and_removed_functions() {
        let before = b"function a() {\n  return 1;\n}\n";
        let after = b"function b() {\n  return 2;\n}\n";
        let changes = classifier().detect_changes("f.js", before, after).unwrap();

        let cats: Vec<ChangeCategory> = changes.iter().map(|c| c.category).collect();
        assert!(cats.contains(&ChangeCategory::FunctionAdded));
        assert!(cats.contains(&ChangeCategory::FunctionRemoved));
    }

    #[test]
    fn signature_change_is_api_surface() {
        let before = b"function login(user) {\n  return user;\n}\n";
        let after = b"function login(user, session) {\n  return user;\n}\n";
        let changes = classifier().detect_changes("f.js", before, after).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::ApiSurfaceChanged);
        assert_eq!(changes[0].symbols, vec!["login"]);
        assert_eq!(changes[0].before.as_deref(), Some("function login(user)"));
        assert_eq!(
            changes[0].after.as_deref(),
            Some("function login(user, session)")
        );
    }

    #[test]
    fn body_change_with_branch_is_condition_changed() {
        let before = b"function check(n) {\n  if (n > 1) return true;\n  return false;\n}\n";
        let after = b"function check(n) {\n  if (n > 2) return true;\n  return false;\n}\n";
        let changes = classifier().detect_changes("f.js", before, after).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::ConditionChanged);
    }

    #[test]
    fn plain_body_change_is_function_modified() {
        let before = b"function f() {\n  return 1;\n}\n";
        let after = b"function f() {\n  return 2;\n}\n";
        let changes = classifier().detect_changes("f.js", before, after).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::FunctionModified);
    }

    #[test]
    fn constant_update_detected() {
        let before = b"const LIMIT = 3;\n";
        let after = b"const LIMIT = 5;\n";
        let changes = classifier().detect_changes("f.js", before, after).unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::ConstantUpdated);
    }

    #[test]
    fn unparseable_content_detects_nothing() {
        let changes = classifier()
            .detect_changes("f.js", b"plain prose", b"other prose")
            .unwrap();
        assert!(changes.is_empty());
    }
}
