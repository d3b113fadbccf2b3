use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};

/// Expand environment variables and a leading tilde in a path string
pub fn expand_path_str(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| path.into())
        .into_owned()
}

/// Expand a PathBuf with environment variables
pub fn expand_path_buf(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_path_str(&path_str))
}

/// Create a directory and all parent directories if they don't exist
pub fn ensure_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {path:?}"))?;
        debug!("Created directory: {path:?}");
    }
    Ok(())
}

/// Expand a path and resolve it to a canonical absolute path, optionally
/// creating it as a directory first.
pub fn resolve_path(path: &Path, create_dirs: bool) -> Result<PathBuf> {
    let expanded = expand_path_buf(path);

    if create_dirs {
        ensure_directory(&expanded)?;
    }

    let canonical = expanded
        .canonicalize()
        .with_context(|| format!("Failed to resolve path: {expanded:?}"))?;

    Ok(canonical)
}
