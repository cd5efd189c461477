// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-file 3-way merge at symbol granularity.
//!
//! Auto-merge is permitted only when each side touches disjoint symbol
//! sets; everything else surfaces a categorised conflict. Unparseable
//! files cannot be merged at symbol granularity, so concurrent edits to
//! them are text conflicts.

use kai_snapshot::{RawSymbol, SymbolExtractor};
use std::collections::BTreeMap;

/// Conflict categories reported by integration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// One side deleted the file, the other modified it.
    DeleteVsModify,
    /// Both sides created the same path with different content.
    ConcurrentCreate,
    /// Both sides changed the same symbol's signature.
    ApiSignatureConflict,
    /// Both sides touched overlapping text that symbol merging cannot
    /// separate.
    TextOverlap,
}

impl ConflictKind {
    /// Stable report string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeleteVsModify => "DELETE_VS_MODIFY",
            Self::ConcurrentCreate => "CONCURRENT_CREATE",
            Self::ApiSignatureConflict => "API_SIGNATURE_CONFLICT",
            Self::TextOverlap => "TEXT_OVERLAP",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of merging one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileMerge {
    /// Merged cleanly; `None` means the file is absent from the result.
    Take(Option<Vec<u8>>),
    /// The sides conflict.
    Conflict(ConflictKind, String),
}

/// Merge one file across `(base, left, right)` versions.
///
/// Trivial cases resolve without parsing: equal sides, or one side
/// untouched. Concurrent edits merge when the extractor can prove the
/// sides changed disjoint symbols.
pub fn merge_file(
    base: Option<&[u8]>,
    left: Option<&[u8]>,
    right: Option<&[u8]>,
    lang: Option<&str>,
    extractor: &dyn SymbolExtractor,
) -> FileMerge {
    if left == right {
        return FileMerge::Take(left.map(<[u8]>::to_vec));
    }
    if base == left {
        return FileMerge::Take(right.map(<[u8]>::to_vec));
    }
    if base == right {
        return FileMerge::Take(left.map(<[u8]>::to_vec));
    }

    // From here on both sides differ from base and from each other.
    match (base, left, right) {
        (_, None, Some(_)) | (_, Some(_), None) => FileMerge::Conflict(
            ConflictKind::DeleteVsModify,
            "one side deleted the file, the other changed it".into(),
        ),
        (None, Some(_), Some(_)) => FileMerge::Conflict(
            ConflictKind::ConcurrentCreate,
            "both sides created the file with different content".into(),
        ),
        (Some(base), Some(left), Some(right)) => {
            merge_symbols(base, left, right, lang, extractor)
        }
        // base-only entries never reach here: left == right == None is the
        // first early return.
        _ => FileMerge::Take(None),
    }
}

/// The body lines of a symbol, as reported by its range.
fn symbol_text(content: &str, symbol: &RawSymbol) -> String {
    let start = symbol.range.start[0] as usize;
    let end = symbol.range.end[0] as usize;
    content
        .lines()
        .skip(start)
        .take(end.saturating_sub(start) + 1)
        .collect::<Vec<_>>()
        .join("\n")
}

type SymbolTable = BTreeMap<String, (RawSymbol, String)>;

fn table(content: &str, lang: &str, extractor: &dyn SymbolExtractor) -> SymbolTable {
    extractor
        .extract(lang, content.as_bytes())
        .into_iter()
        .map(|s| {
            let text = symbol_text(content, &s);
            (s.name.clone(), (s, text))
        })
        .collect()
}

/// Names whose definition differs between two tables (added, removed, or
/// changed text).
fn changed_names(from: &SymbolTable, to: &SymbolTable) -> Vec<String> {
    let mut out = Vec::new();
    for (name, (_, text)) in to {
        match from.get(name) {
            None => out.push(name.clone()),
            Some((_, base_text)) if base_text != text => out.push(name.clone()),
            Some(_) => {}
        }
    }
    for name in from.keys() {
        if !to.contains_key(name) {
            out.push(name.clone());
        }
    }
    out
}

fn merge_symbols(
    base: &[u8],
    left: &[u8],
    right: &[u8],
    lang: Option<&str>,
    extractor: &dyn SymbolExtractor,
) -> FileMerge {
    let (Some(lang), Ok(base_text), Ok(left_text), Ok(right_text)) = (
        lang,
        std::str::from_utf8(base),
        std::str::from_utf8(left),
        std::str::from_utf8(right),
    ) else {
        return FileMerge::Conflict(
            ConflictKind::TextOverlap,
            "concurrent changes to unparseable content".into(),
        );
    };

    let base_table = table(base_text, lang, extractor);
    let left_table = table(left_text, lang, extractor);
    let right_table = table(right_text, lang, extractor);
    if base_table.is_empty() && left_table.is_empty() && right_table.is_empty() {
        return FileMerge::Conflict(
            ConflictKind::TextOverlap,
            "concurrent changes to unparseable content".into(),
        );
    }

    let left_changed = changed_names(&base_table, &left_table);
    let right_changed = changed_names(&base_table, &right_table);

    let overlapping: Vec<&String> = left_changed
        .iter()
        .filter(|name| right_changed.contains(name))
        .collect();
    if let Some(name) = overlapping.first() {
        let left_sig = left_table.get(*name).map(|(s, _)| s.signature.as_str());
        let right_sig = right_table.get(*name).map(|(s, _)| s.signature.as_str());
        let kind = if left_sig != right_sig {
            ConflictKind::ApiSignatureConflict
        } else {
            ConflictKind::TextOverlap
        };
        return FileMerge::Conflict(kind, format!("both sides changed symbol {name}"));
    }

    // Disjoint symbol sets: start from the left content and graft the
    // right side's changes onto it.
    let mut lines: Vec<String> = left_text.lines().map(str::to_string).collect();
    for name in &right_changed {
        match (right_table.get(name), left_table.get(name)) {
            // Changed on the right, untouched on the left: replace the
            // left occurrence in place.
            (Some((_, right_body)), Some((left_sym, _))) => {
                let start = left_sym.range.start[0] as usize;
                let end = (left_sym.range.end[0] as usize).min(lines.len().saturating_sub(1));
                lines.splice(start..=end, right_body.lines().map(str::to_string));
            }
            // Added on the right: append.
            (Some((_, right_body)), None) => {
                if !lines.is_empty() {
                    lines.push(String::new());
                }
                lines.extend(right_body.lines().map(str::to_string));
            }
            // Removed on the right: drop the left occurrence.
            (None, Some((left_sym, _))) => {
                let start = left_sym.range.start[0] as usize;
                let end = (left_sym.range.end[0] as usize).min(lines.len().saturating_sub(1));
                lines.drain(start..=end);
            }
            (None, None) => {}
        }
    }

    let mut merged = lines.join("\n");
    merged.push('\n');
    FileMerge::Take(Some(merged.into_bytes()))
}
