use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::DepotRegistry;

/// Name of the dependency pin file in the base depot checkout
pub const DEPS_FILE: &str = "DEPS";

/// Parse the `vars` section of a DEPS file into `{deps_var: revision}`.
///
/// The file is a Python fragment; rather than evaluating it, the pins are
/// scraped textually:
///
/// ```text
/// vars = {
///   'webkit_revision': 'a94a03c2bb28230ea0e0ec5d70b04a43deca9e34',
/// }
/// ```
fn parse_deps_vars(contents: &str) -> Option<BTreeMap<String, String>> {
    let vars_re = Regex::new(r"vars\s*=\s*\{(?P<body>[^}]+)").unwrap();
    let body = vars_re.captures(contents)?["body"].to_string();

    let entry_re = Regex::new(r"'(?P<var>[\w_-]+)':\s*'(?P<rev>[\w@.-]+)'").unwrap();
    let mut vars = BTreeMap::new();
    for captures in entry_re.captures_iter(&body) {
        vars.insert(captures["var"].to_string(), captures["rev"].to_string());
    }

    Some(vars)
}

/// Read the base depot's DEPS file and report which pinned revision each
/// tracked depot is at.
///
/// Only depots reachable from `current_depot` (their `from` lists name it)
/// and carrying a `deps_var` are reported; a depot whose variable is missing
/// from the file is simply absent from the result.
pub fn external_revisions(
    checkout_dir: &Path,
    current_depot: &str,
    registry: &DepotRegistry,
) -> Result<BTreeMap<String, String>> {
    let deps_path = checkout_dir.join(DEPS_FILE);
    let contents = std::fs::read_to_string(&deps_path)
        .with_context(|| format!("Failed to read dependency file: {deps_path:?}"))?;

    parse_external_revisions(&contents, current_depot, registry)
        .with_context(|| format!("Failed to parse dependency pins from {deps_path:?}"))
}

/// The parse half of [`external_revisions`], split out for testing
pub fn parse_external_revisions(
    contents: &str,
    current_depot: &str,
    registry: &DepotRegistry,
) -> Result<BTreeMap<String, String>> {
    let vars =
        parse_deps_vars(contents).context("No vars section found in the dependency file")?;

    let mut results = BTreeMap::new();
    for name in registry.names() {
        let info = registry.expect(name)?;
        if !info.recurse || !info.from.iter().any(|parent| parent == current_depot) {
            continue;
        }

        if let Some(deps_var) = &info.deps_var {
            if let Some(revision) = vars.get(deps_var) {
                results.insert(name.to_string(), revision.trim_matches('@').to_string());
            }
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DepotRegistry;

    const DEPS_CONTENTS: &str = r#"
vars = {
  'webkit_revision': 'a94a03c2bb28230ea0e0ec5d70b04a43deca9e34',
  'v8_revision': '22c5e05c1b1ea24d4a2297f82b533598c7dd3f13',
  'unrelated_var': 'some-value',
}

deps = {
  'src/third_party/WebKit': 'https://example.org/webkit.git@' + Var('webkit_revision'),
}
"#;

    #[test]
    fn test_parse_external_revisions() {
        let registry = DepotRegistry::builtin();
        let externals = parse_external_revisions(DEPS_CONTENTS, "chromium", &registry).unwrap();

        assert_eq!(
            externals.get("webkit").map(String::as_str),
            Some("a94a03c2bb28230ea0e0ec5d70b04a43deca9e34")
        );
        assert_eq!(
            externals.get("v8").map(String::as_str),
            Some("22c5e05c1b1ea24d4a2297f82b533598c7dd3f13")
        );
        // skia has a deps_var but no pin in this file
        assert!(!externals.contains_key("skia/src"));
    }

    #[test]
    fn test_parse_ignores_unreachable_depots() {
        let registry = DepotRegistry::builtin();
        // webkit's parent is chromium, so nothing is reachable from webkit
        let externals = parse_external_revisions(DEPS_CONTENTS, "webkit", &registry).unwrap();
        assert!(externals.is_empty());
    }

    #[test]
    fn test_parse_without_vars_section_fails() {
        let registry = DepotRegistry::builtin();
        let result = parse_external_revisions("deps = {}\n", "chromium", &registry);
        assert!(result.is_err());
    }
}
