// SPDX-License-Identifier: MIT OR Apache-2.0
//! kai-glob
//!
//! Maps file paths to module names via compiled glob patterns. The matcher
//! is the `ModuleMatcher` capability the snapshot builder and change
//! engine consume: they never see the pattern syntax, only the resulting
//! module names and payloads.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use globset::{Glob, GlobSet, GlobSetBuilder};
use kai_core::ModulePayload;
use kai_error::{ErrorCode, KaiError, Result};
use std::collections::BTreeSet;

/// One module definition: a name and the glob patterns that claim paths
/// for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRule {
    /// Module name.
    pub name: String,
    /// Glob patterns (e.g. `src/auth/**`).
    pub patterns: Vec<String>,
}

impl ModuleRule {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, patterns: &[&str]) -> Self {
        Self {
            name: name.into(),
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

/// Compiled path → module matcher. A path may belong to several modules;
/// matching returns the full set.
#[derive(Debug)]
pub struct ModuleMatcher {
    modules: Vec<(ModuleRule, GlobSet)>,
}

impl ModuleMatcher {
    /// Compile a rule list.
    ///
    /// # Errors
    ///
    /// `invalid_input` when any pattern fails to compile.
    pub fn new(rules: Vec<ModuleRule>) -> Result<Self> {
        let mut modules = Vec::with_capacity(rules.len());
        for rule in rules {
            let mut builder = GlobSetBuilder::new();
            for pattern in &rule.patterns {
                let glob = Glob::new(pattern).map_err(|e| {
                    KaiError::new(
                        ErrorCode::InvalidPattern,
                        format!("invalid module glob: {pattern}"),
                    )
                    .with_source(e)
                })?;
                builder.add(glob);
            }
            let set = builder
                .build()
                .map_err(|e| KaiError::internal("compile glob set").with_source(e))?;
            modules.push((rule, set));
        }
        Ok(Self { modules })
    }

    /// An empty matcher: no path maps to any module.
    #[must_use]
    pub fn empty() -> Self {
        Self { modules: Vec::new() }
    }

    /// Names of every module whose patterns match `path`.
    #[must_use]
    pub fn match_path(&self, path: &str) -> BTreeSet<String> {
        self.modules
            .iter()
            .filter(|(_, set)| set.is_match(path))
            .map(|(rule, _)| rule.name.clone())
            .collect()
    }

    /// The payload for a module name, when defined.
    #[must_use]
    pub fn module_payload(&self, name: &str) -> Option<ModulePayload> {
        self.modules
            .iter()
            .find(|(rule, _)| rule.name == name)
            .map(|(rule, _)| ModulePayload {
                name: rule.name.clone(),
                paths: rule.patterns.clone(),
            })
    }

    /// Number of configured modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// `true` when no modules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> ModuleMatcher {
        ModuleMatcher::new(vec![
            ModuleRule::new("auth", &["src/auth/**"]),
            ModuleRule::new("api", &["src/api/**", "src/routes/**"]),
            ModuleRule::new("all-src", &["src/**"]),
        ])
        .unwrap()
    }

    #[test]
    fn path_maps_to_every_matching_module() {
        let m = matcher();
        let names = m.match_path("src/auth/login.js");
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["all-src".to_string(), "auth".to_string()]
        );
    }

    #[test]
    fn unmatched_paths_yield_empty_set() {
        let m = matcher();
        assert!(m.match_path("README.md").is_empty());
    }

    #[test]
    fn multiple_patterns_per_module() {
        let m = matcher();
        assert!(m.match_path("src/routes/users.js").contains("api"));
        assert!(m.match_path("src/api/v1.js").contains("api"));
    }

    #[test]
    fn module_payload_exposes_patterns() {
        let m = matcher();
        let payload = m.module_payload("api").unwrap();
        assert_eq!(payload.name, "api");
        assert_eq!(payload.paths, vec!["src/api/**", "src/routes/**"]);
        assert!(m.module_payload("nope").is_none());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = ModuleMatcher::new(vec![ModuleRule::new("bad", &["["])]).unwrap_err();
        assert!(err.to_string().contains("invalid module glob"));
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        let m = ModuleMatcher::empty();
        assert!(m.is_empty());
        assert!(m.match_path("src/a.js").is_empty());
    }
}
