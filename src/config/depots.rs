use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::traits::Configuration;

/// Static description of one trackable source repository.
///
/// The bisection recurses into depots with `recurse` set whenever the pinned
/// revision of that depot changes across the narrowed range. Depots that are
/// split git mirrors of a single upstream repository name their siblings in
/// `depends`; all of them must resolve to a consistent point before the
/// depot's own checkout is trusted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepotInfo {
    /// Working directory, relative to the bisection root
    pub src: PathBuf,
    /// Whether this depot participates in recursive bisection
    #[serde(default)]
    pub recurse: bool,
    /// Sibling depots sharing an upstream that must sync alongside this one
    #[serde(default)]
    pub depends: Vec<String>,
    /// Parent depots from which this one can be reached
    #[serde(default)]
    pub from: Vec<String>,
    /// Upstream URL embedded in git-svn-id lines, for numeric revision lookup
    #[serde(default)]
    pub svn_url: Option<String>,
    /// Key naming this depot's pinned revision in the parent's DEPS file
    #[serde(default)]
    pub deps_var: Option<String>,
    /// Sync through gclient so the whole dependency graph follows; plain
    /// git checkout otherwise
    #[serde(default)]
    pub gclient_sync: bool,
}

/// The set of depots a bisection may touch, keyed by name.
///
/// Immutable once constructed; the driver holds it by reference for the
/// whole run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepotRegistry {
    /// Name of the base depot (the main source tree)
    pub base: String,
    pub depots: BTreeMap<String, DepotInfo>,
    /// Path to the config file (set during loading)
    #[serde(skip)]
    path: PathBuf,
}

impl DepotRegistry {
    /// The built-in depot table: the main tree plus the third-party
    /// repositories whose rolls are worth bisecting into.
    pub fn builtin() -> Self {
        let mut depots = BTreeMap::new();

        depots.insert(
            "chromium".to_string(),
            DepotInfo {
                src: PathBuf::from("src"),
                recurse: true,
                depends: Vec::new(),
                from: Vec::new(),
                svn_url: Some("svn://svn.chromium.org/chrome/trunk/src".to_string()),
                deps_var: Some("chromium_rev".to_string()),
                gclient_sync: true,
            },
        );
        depots.insert(
            "webkit".to_string(),
            DepotInfo {
                src: PathBuf::from("src/third_party/WebKit"),
                recurse: true,
                depends: Vec::new(),
                from: vec!["chromium".to_string()],
                svn_url: None,
                deps_var: Some("webkit_revision".to_string()),
                gclient_sync: false,
            },
        );
        depots.insert(
            "v8".to_string(),
            DepotInfo {
                src: PathBuf::from("src/v8"),
                recurse: true,
                depends: Vec::new(),
                from: vec!["chromium".to_string()],
                svn_url: None,
                deps_var: Some("v8_revision".to_string()),
                gclient_sync: false,
            },
        );
        depots.insert(
            "skia/src".to_string(),
            DepotInfo {
                src: PathBuf::from("src/third_party/skia/src"),
                recurse: true,
                depends: vec!["skia/include".to_string(), "skia/gyp".to_string()],
                from: vec!["chromium".to_string()],
                svn_url: Some("http://skia.googlecode.com/svn/trunk/src".to_string()),
                deps_var: Some("skia_revision".to_string()),
                gclient_sync: false,
            },
        );
        depots.insert(
            "skia/include".to_string(),
            DepotInfo {
                src: PathBuf::from("src/third_party/skia/include"),
                recurse: false,
                depends: Vec::new(),
                from: vec!["chromium".to_string()],
                svn_url: Some("http://skia.googlecode.com/svn/trunk/include".to_string()),
                deps_var: None,
                gclient_sync: false,
            },
        );
        depots.insert(
            "skia/gyp".to_string(),
            DepotInfo {
                src: PathBuf::from("src/third_party/skia/gyp"),
                recurse: false,
                depends: Vec::new(),
                from: vec!["chromium".to_string()],
                svn_url: Some("http://skia.googlecode.com/svn/trunk/gyp".to_string()),
                deps_var: None,
                gclient_sync: false,
            },
        );

        Self {
            base: "chromium".to_string(),
            depots,
            path: PathBuf::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DepotInfo> {
        self.depots.get(name)
    }

    /// Look up a depot that the caller knows must exist
    pub fn expect(&self, name: &str) -> Result<&DepotInfo> {
        self.depots
            .get(name)
            .with_context(|| format!("Unknown depot: [{name}]"))
    }

    pub fn is_base(&self, name: &str) -> bool {
        name == self.base
    }

    pub fn base_info(&self) -> &DepotInfo {
        &self.depots[&self.base]
    }

    /// Depot names in deterministic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.depots.keys().map(String::as_str)
    }

    /// Absolute working directory of a depot under the bisection root
    pub fn directory(&self, root: &Path, name: &str) -> Result<PathBuf> {
        Ok(root.join(&self.expect(name)?.src))
    }
}

impl Configuration for DepotRegistry {
    fn config_type(&self) -> &str {
        "depot registry"
    }

    fn validate(&self) -> Result<()> {
        if !self.depots.contains_key(&self.base) {
            anyhow::bail!("Base depot [{}] is not in the depot table", self.base);
        }

        if !self.depots[&self.base].from.is_empty() {
            anyhow::bail!("Base depot [{}] must not have a parent", self.base);
        }

        for (name, info) in &self.depots {
            for parent in &info.from {
                if !self.depots.contains_key(parent) {
                    anyhow::bail!("Depot [{name}] names unknown parent [{parent}]");
                }
            }
            for sibling in &info.depends {
                if !self.depots.contains_key(sibling) {
                    anyhow::bail!("Depot [{name}] names unknown sibling [{sibling}]");
                }
            }
            if info.recurse && !info.depends.is_empty() && info.svn_url.is_none() {
                anyhow::bail!(
                    "Depot [{name}] has split mirrors but no upstream URL to resolve them with"
                );
            }
        }

        Ok(())
    }
}

/// Load a depot registry from a YAML file
pub fn load_depot_config(path: &PathBuf) -> Result<DepotRegistry> {
    if !path.exists() {
        anyhow::bail!("Depot config file not found: {:?}", path);
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read depot config file: {:?}", path))?;

    let mut registry: DepotRegistry = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse YAML from file: {:?}", path))?;

    registry.path = path.to_path_buf();
    registry.validate()?;

    debug!("Using {} from {:?}", registry.config_type(), path);
    Ok(registry)
}
