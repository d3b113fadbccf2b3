use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::Path;

use crate::command::CommandRunner;

/// Branch the base checkout must be on; gclient refuses to sync elsewhere.
pub const EXPECTED_BRANCH: &str = "master";

/// Commit metadata used when reporting the suspected culprit
#[derive(Debug, Clone, Default)]
pub struct RevisionInfo {
    pub subject: String,
    pub author: String,
    pub email: String,
    pub date: String,
}

/// Abstraction over the version control system.
///
/// The driver only ever needs revision enumeration, syncing, and resolution
/// of legacy numeric revisions to hashes; everything else about the VCS is
/// out of scope. Command failures on the enumeration paths are hard errors,
/// since a repository that cannot answer `log` cannot be reasoned about.
/// Syncing reports success as a boolean instead, because a failed sync is a
/// per-revision condition the search works around.
pub trait SourceControl {
    /// All commits on the first-parent chain from `end` back to and
    /// including `start`, newest first.
    fn revision_list(&self, end: &str, start: &str, cwd: &Path) -> Result<Vec<String>>;

    /// Move the checkout to `revision`. With `use_gclient` the full
    /// dependency graph moves too; `revision` is then a `<src>@<rev>` spec.
    fn sync_to_revision(&self, revision: &str, use_gclient: bool, cwd: &Path) -> bool;

    /// Map a revision identifier to a hash in this checkout. Hash-shaped
    /// input comes back unchanged; a legacy numeric revision is searched in
    /// the log over a window of `search` candidate numbers (forward when
    /// positive, backward when negative) by matching the literal
    /// `git-svn-id: <svn_url>@<n>` line. `None` means nothing matched in the
    /// window.
    fn resolve_to_revision(
        &self,
        revision: &str,
        svn_url: &str,
        search: i64,
        cwd: &Path,
    ) -> Option<String>;

    /// Whether the checkout is on the branch the sync tooling requires
    fn is_in_proper_branch(&self, cwd: &Path) -> Result<bool>;

    /// Commit metadata for the report
    fn query_revision_info(&self, revision: &str, cwd: &Path) -> Result<RevisionInfo>;

    /// Committer timestamp, for ordering sanity checks
    fn commit_time(&self, revision: &str, cwd: &Path) -> Result<i64>;

    /// The numeric upstream revision recorded for a commit, if any
    fn svn_find_rev(&self, revision: &str, cwd: &Path) -> Option<u64>;

    /// Paths touched by a commit
    fn changed_files(&self, revision: &str, cwd: &Path) -> Result<Vec<String>>;
}

/// `SourceControl` implemented over the git command line
#[derive(Debug, Default)]
pub struct GitSourceControl;

impl GitSourceControl {
    pub fn new() -> Self {
        Self
    }

    fn run_git(&self, args: &[&str], cwd: &Path) -> Result<String> {
        let output = CommandRunner::in_dir(cwd)
            .run("git", args)
            .with_context(|| format!("git {} failed in {:?}", args.join(" "), cwd))?;

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl SourceControl for GitSourceControl {
    fn revision_list(&self, end: &str, start: &str, cwd: &Path) -> Result<Vec<String>> {
        // start~1..end keeps the known-good endpoint in the list
        let range = format!("{start}~1..{end}");
        let output = self.run_git(
            &["log", "--format=%H", "--first-parent", range.as_str()],
            cwd,
        )?;

        Ok(output.split_whitespace().map(str::to_string).collect())
    }

    fn sync_to_revision(&self, revision: &str, use_gclient: bool, cwd: &Path) -> bool {
        let runner = CommandRunner::in_dir(cwd);

        let status = if use_gclient {
            runner.run_streaming(
                "gclient",
                &["sync", "--verbose", "--reset", "--force", "--revision", revision],
            )
        } else {
            runner.run_streaming("git", &["checkout", revision])
        };

        match status {
            Ok(status) => status.success(),
            Err(err) => {
                warn!("Sync to [{revision}] could not start: {err:#}");
                false
            }
        }
    }

    fn resolve_to_revision(
        &self,
        revision: &str,
        svn_url: &str,
        search: i64,
        cwd: &Path,
    ) -> Option<String> {
        // Anything that isn't a bare number is already a hash or ref
        let svn_revision: i64 = match revision.parse() {
            Ok(n) => n,
            Err(_) => return Some(revision.to_string()),
        };

        let step = if search > 0 { 1 } else { -1 };
        for offset in 0..search.abs() {
            let candidate = svn_revision + step * offset;
            let pattern = format!("git-svn-id: {svn_url}@{candidate} ");
            let output = self
                .run_git(
                    &[
                        "log",
                        "--format=%H",
                        "-1",
                        "--grep",
                        pattern.as_str(),
                        "origin/master",
                    ],
                    cwd,
                )
                .ok()?;

            let found = output.trim();
            if !found.is_empty() {
                debug!("Resolved r{svn_revision} to {found} (offset {offset})");
                return Some(found.to_string());
            }
        }

        None
    }

    fn is_in_proper_branch(&self, cwd: &Path) -> Result<bool> {
        let output = self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"], cwd)?;
        Ok(output.trim() == EXPECTED_BRANCH)
    }

    fn query_revision_info(&self, revision: &str, cwd: &Path) -> Result<RevisionInfo> {
        let output = self.run_git(
            &["log", "--format=%s%n%aN%n%aE%n%cD", "-1", revision],
            cwd,
        )?;

        let mut lines = output.lines();
        let mut next = || lines.next().unwrap_or_default().trim().to_string();

        Ok(RevisionInfo {
            subject: next(),
            author: next(),
            email: next(),
            date: next(),
        })
    }

    fn commit_time(&self, revision: &str, cwd: &Path) -> Result<i64> {
        let output = self.run_git(&["log", "--format=%ct", "-1", revision], cwd)?;
        output
            .trim()
            .parse()
            .with_context(|| format!("Unparseable commit time for [{revision}]: {output:?}"))
    }

    fn svn_find_rev(&self, revision: &str, cwd: &Path) -> Option<u64> {
        let output = CommandRunner::in_dir(cwd)
            .run("git", &["svn", "find-rev", revision])
            .ok()?;

        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }

    fn changed_files(&self, revision: &str, cwd: &Path) -> Result<Vec<String>> {
        let output = self.run_git(
            &["diff-tree", "--no-commit-id", "--name-only", "-r", revision],
            cwd,
        )?;

        Ok(output.lines().map(str::to_string).collect())
    }
}
