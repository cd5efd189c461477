// SPDX-License-Identifier: MIT OR Apache-2.0
//! Symbol extraction capability.
//!
//! Real structural parsing is an external collaborator; the core only
//! depends on this trait. An empty result means "unparseable or no
//! symbols" and is always valid. [`SimpleFunctionExtractor`] is a
//! line-oriented fallback good enough for javascript/typescript/python
//! declaration surfaces; it deliberately ignores nesting.

use kai_core::{SymbolKind, SymbolRange};

/// A symbol as reported by an extractor, before it is bound to a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSymbol {
    /// Symbol name.
    pub name: String,
    /// Classification.
    pub kind: SymbolKind,
    /// Source range, zero-based `[line, col]`.
    pub range: SymbolRange,
    /// Declaration text.
    pub signature: String,
}

/// Per-language symbol extraction.
pub trait SymbolExtractor: Send + Sync {
    /// Extract the symbol table of `content`. Returning an empty vec is
    /// valid and means "unparseable or no symbols".
    fn extract(&self, lang: &str, content: &[u8]) -> Vec<RawSymbol>;
}

/// Extractor that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullExtractor;

impl SymbolExtractor for NullExtractor {
    fn extract(&self, _lang: &str, _content: &[u8]) -> Vec<RawSymbol> {
        Vec::new()
    }
}

/// Line-oriented declaration scanner for scripting languages.
///
/// Recognises `function name(...)`, `class Name`, `const name = ...`
/// (arrow functions count as functions), and python `def` / `class`
/// forms. Each symbol's range runs from its declaration line to the line
/// before the next declaration (or EOF).
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleFunctionExtractor;

impl SimpleFunctionExtractor {
    fn scan_line(lang: &str, line: &str) -> Option<(String, SymbolKind, String)> {
        let trimmed = line.trim_start();
        let signature = trimmed.trim_end_matches('{').trim_end().to_string();

        match lang {
            "javascript" | "typescript" => {
                let decl = trimmed.strip_prefix("export ").unwrap_or(trimmed);
                if let Some(rest) = decl
                    .strip_prefix("async function ")
                    .or_else(|| decl.strip_prefix("function "))
                {
                    let name = ident_prefix(rest)?;
                    return Some((name, SymbolKind::Function, signature));
                }
                if let Some(rest) = decl.strip_prefix("class ") {
                    let name = ident_prefix(rest)?;
                    return Some((name, SymbolKind::Class, signature));
                }
                if let Some(rest) = decl.strip_prefix("interface ") {
                    let name = ident_prefix(rest)?;
                    return Some((name, SymbolKind::Interface, signature));
                }
                if let Some(rest) = decl
                    .strip_prefix("const ")
                    .or_else(|| decl.strip_prefix("let "))
                {
                    let name = ident_prefix(rest)?;
                    let kind = if decl.contains("=>") {
                        SymbolKind::Function
                    } else {
                        SymbolKind::Variable
                    };
                    return Some((name, kind, signature));
                }
                None
            }
            "python" => {
                if let Some(rest) = trimmed
                    .strip_prefix("async def ")
                    .or_else(|| trimmed.strip_prefix("def "))
                {
                    let name = ident_prefix(rest)?;
                    return Some((name, SymbolKind::Function, signature.trim_end_matches(':').to_string()));
                }
                if let Some(rest) = trimmed.strip_prefix("class ") {
                    let name = ident_prefix(rest)?;
                    return Some((name, SymbolKind::Class, signature.trim_end_matches(':').to_string()));
                }
                None
            }
            _ => None,
        }
    }
}

fn ident_prefix(text: &str) -> Option<String> {
    let name: String = text
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    if name.is_empty() { None } else { Some(name) }
}

impl SymbolExtractor for SimpleFunctionExtractor {
    fn extract(&self, lang: &str, content: &[u8]) -> Vec<RawSymbol> {
        let Ok(text) = std::str::from_utf8(content) else {
            return Vec::new();
        };
        let lines: Vec<&str> = text.lines().collect();

        let mut decls: Vec<(u32, String, SymbolKind, String)> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if let Some((name, kind, signature)) = Self::scan_line(lang, line) {
                decls.push((i as u32, name, kind, signature));
            }
        }

        let total = lines.len() as u32;
        let mut out = Vec::with_capacity(decls.len());
        for (idx, (line, name, kind, signature)) in decls.iter().enumerate() {
            let end_line = decls
                .get(idx + 1)
                .map_or(total.saturating_sub(1), |(next, ..)| next.saturating_sub(1));
            out.push(RawSymbol {
                name: name.clone(),
                kind: *kind,
                range: SymbolRange {
                    start: [*line, 0],
                    end: [end_line.max(*line), 0],
                },
                signature: signature.clone(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_extractor_finds_nothing() {
        let symbols = NullExtractor.extract("javascript", b"function a() {}");
        assert!(symbols.is_empty());
    }

    #[test]
    fn javascript_functions_and_classes() {
        let src = b"function login(user) {\n  return user;\n}\n\nexport class Session {\n}\nconst retry = (f) => f();\nconst LIMIT = 3;\n";
        let symbols = SimpleFunctionExtractor.extract("javascript", src);
        let names: Vec<(&str, SymbolKind)> = symbols
            .iter()
            .map(|s| (s.name.as_str(), s.kind))
            .collect();
        assert_eq!(
            names,
            vec![
                ("login", SymbolKind::Function),
                ("Session", SymbolKind::Class),
                ("retry", SymbolKind::Function),
                ("LIMIT", SymbolKind::Variable),
            ]
        );
        assert_eq!(symbols[0].signature, "function login(user)");
        assert_eq!(symbols[0].range.start, [0, 0]);
    }

    #[test]
    fn python_defs() {
        let src = b"def handler(event):\n    pass\n\nclass Worker:\n    pass\n";
        let symbols = SimpleFunctionExtractor.extract("python", src);
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "handler");
        assert_eq!(symbols[0].signature, "def handler(event)");
        assert_eq!(symbols[1].kind, SymbolKind::Class);
    }

    #[test]
    fn unknown_language_is_empty() {
        assert!(SimpleFunctionExtractor.extract("cobol", b"x").is_empty());
    }

    #[test]
    fn invalid_utf8_is_empty() {
        assert!(SimpleFunctionExtractor.extract("javascript", &[0xff, 0xfe]).is_empty());
    }
}
