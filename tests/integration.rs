//! End-to-end bisections against real temporary git repositories, with the
//! build step stubbed out and a shell one-liner standing in for the
//! performance test.

use anyhow::Result;
use tempfile::tempdir;

use bisectkit::bisect::{BisectDriver, RevisionState, SyncBuildRunEvaluator};
use bisectkit::config::{BisectConfig, BisectOptions, DepotRegistry};
use bisectkit::source_control::{GitSourceControl, SourceControl};

mod test_utils;
use test_utils::{deps_with_webkit_pin, PerfRepo, REPORT_VALUE_COMMAND};

fn options(bad: &str, good: &str) -> BisectOptions {
    BisectOptions {
        command: REPORT_VALUE_COMMAND.to_string(),
        metric: "times/t".to_string(),
        bad_revision: bad.to_string(),
        good_revision: good.to_string(),
        repeat_test_count: 2,
        debug_ignore_build: true,
        ..BisectOptions::default()
    }
}

fn local_registry() -> DepotRegistry {
    let mut registry = DepotRegistry::builtin();
    // No gclient on the test host; sync the base depot with plain git
    registry.depots.get_mut("chromium").unwrap().gclient_sync = false;
    registry
}

#[test]
fn test_revision_list_includes_good_endpoint() -> Result<()> {
    let root = tempdir()?;
    let repo = PerfRepo::init(&root.path().join("src"));

    repo.commit("base", &[("README", "perf repo fixture\n")]);
    let good = repo.commit_value(1.0, &[]);
    let mid = repo.commit_value(1.0, &[]);
    let bad = repo.commit_value(5.0, &[]);

    let source_control = GitSourceControl::new();
    let list = source_control.revision_list(&bad, &good, &repo.dir)?;

    assert_eq!(list, vec![bad, mid, good.clone()]);
    assert_eq!(list.last(), Some(&good));
    Ok(())
}

#[test]
fn test_branch_guard() -> Result<()> {
    let root = tempdir()?;
    let repo = PerfRepo::init(&root.path().join("src"));
    repo.commit("base", &[("README", "fixture\n")]);

    let source_control = GitSourceControl::new();
    assert!(source_control.is_in_proper_branch(&repo.dir)?);

    test_utils::git(&repo.dir, &["checkout", "--quiet", "-b", "topic"]);
    assert!(!source_control.is_in_proper_branch(&repo.dir)?);
    Ok(())
}

#[test]
fn test_single_repo_bisection_finds_culprit() -> Result<()> {
    let root = tempdir()?;
    let repo = PerfRepo::init(&root.path().join("src"));

    let deps = deps_with_webkit_pin("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    repo.commit("base", &[("DEPS", deps.as_str())]);
    let good = repo.commit_value(1.0, &[]);
    let before_culprit = repo.commit_value(1.0, &[]);
    let culprit = repo.commit_value(5.0, &[]);
    let _after_culprit = repo.commit_value(5.0, &[]);
    let bad = repo.commit_value(5.0, &[]);

    let config = BisectConfig {
        options: options(&bad, &good),
        depots: local_registry(),
    };

    let evaluator = SyncBuildRunEvaluator::new(
        &config,
        GitSourceControl::new(),
        root.path().to_path_buf(),
    )?;
    let driver = BisectDriver::new(
        &config,
        GitSourceControl::new(),
        evaluator,
        root.path().to_path_buf(),
    );
    let results = driver.run()?;

    assert_eq!(
        results.last_broken_revision.as_ref().unwrap().revision_id,
        culprit
    );
    assert_eq!(
        results.first_working_revision.as_ref().unwrap().revision_id,
        before_culprit
    );

    // Identical samples within each group make the verdict unambiguous
    assert!(results.confidence > 90.0);
    assert!(results.regression_size_percent.unwrap() > 100.0);

    let state_of = |revision: &str| {
        results
            .revision_data
            .iter()
            .find(|data| data.revision_id == revision)
            .unwrap()
            .state
    };
    assert_eq!(state_of(&bad), RevisionState::Failed);
    assert_eq!(state_of(&good), RevisionState::Passed);
    assert_eq!(state_of(&culprit), RevisionState::Failed);
    // Never visited: the window closed before reaching it
    assert_eq!(state_of(&_after_culprit), RevisionState::Unknown);

    Ok(())
}
