use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use url::Url;

use crate::command::CommandRunner;

/// Where the base depot checkout comes from: an existing local clone or a
/// remote to clone from.
#[derive(Debug, Clone)]
pub enum RepoSource {
    Local(PathBuf),
    Remote(String),
}

impl RepoSource {
    /// Detect whether a source string is a git URL or a local path
    pub fn new(source: &str) -> Self {
        if let Ok(url) = Url::parse(source) {
            if url.scheme() == "http" || url.scheme() == "https" || url.scheme() == "git" {
                return RepoSource::Remote(source.to_string());
            }
        }
        if source.starts_with("git@") && source.contains(':') {
            return RepoSource::Remote(source.to_string());
        }

        RepoSource::Local(PathBuf::from(source))
    }
}

/// Make sure the base depot checkout exists under the bisection root,
/// cloning it from `source` when it doesn't. Returns the checkout path.
///
/// An existing checkout is left exactly as it is; syncing it to the right
/// revisions is the driver's job, not setup's.
pub fn ensure_base_checkout(
    root: &Path,
    base_src: &Path,
    source: Option<&str>,
) -> Result<PathBuf> {
    let checkout = root.join(base_src);

    if checkout.join(".git").exists() {
        debug!("Using existing checkout: {}", checkout.display());
        return Ok(checkout);
    }

    let Some(source) = source else {
        anyhow::bail!(
            "No checkout found at {}. Pass --source to create one there.",
            checkout.display()
        );
    };

    match RepoSource::new(source) {
        RepoSource::Local(path) => {
            if !path.join(".git").exists() {
                anyhow::bail!(
                    "Source directory is not a git repository: {}",
                    path.display()
                );
            }
            info!(
                "Cloning local repository {} to {}",
                path.display(),
                checkout.display()
            );
            clone_repository(&path.to_string_lossy(), &checkout)?;
        }
        RepoSource::Remote(url) => {
            info!("Cloning repository: {} to {}", url, checkout.display());
            clone_repository(&url, &checkout)?;
        }
    }

    Ok(checkout)
}

fn clone_repository(source: &str, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let target_str = target.to_string_lossy();
    let status = CommandRunner::new()
        .run_streaming("git", &["clone", source, target_str.as_ref()])
        .with_context(|| format!("Failed to clone repository: {source}"))?;

    if !status.success() {
        anyhow::bail!("git clone failed with status code: {status}");
    }

    Ok(())
}
