// SPDX-License-Identifier: MIT OR Apache-2.0
//! File-extension → language tagging.

/// Detect a language tag from a path's extension. Unknown extensions get
/// `None`; files without a tag still snapshot, they just skip symbol
/// extraction and structural diffing.
#[must_use]
pub fn lang_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    let lang = match ext {
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" | "mts" => "typescript",
        "py" | "pyi" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        _ => return None,
    };
    Some(lang)
}
