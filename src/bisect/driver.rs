use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;

use crate::annotations;
use crate::bisect::evaluate::{RevisionEvaluator, RunOutcome};
use crate::bisect::metrics::MetricMap;
use crate::bisect::report::BisectResults;
use crate::bisect::revision::{
    add_revisions, RevisionData, RevisionMap, RevisionState, RunValue,
};
use crate::config::BisectConfig;
use crate::source_control::SourceControl;

/// Decide whether a sample reads as good or bad, by comparing its per-key
/// distance to the two reference vectors and taking a majority vote across
/// the keys. Metric scales differ wildly between keys, so no fixed threshold
/// would work; a key votes "passed" only when strictly closer to the good
/// reference, and ties lose, which keeps an ambiguous sample on the failing
/// side of the window.
pub fn check_if_run_passed(
    current: &MetricMap,
    known_good: &MetricMap,
    known_bad: &MetricMap,
) -> bool {
    let mut votes_passed = 0usize;
    let mut votes_failed = 0usize;

    for (key, value) in current {
        let (Some(good), Some(bad)) = (known_good.get(key), known_bad.get(key)) else {
            continue;
        };

        if (value - good).abs() < (value - bad).abs() {
            votes_passed += 1;
        } else {
            votes_failed += 1;
        }
    }

    votes_passed > votes_failed
}

/// Drives one bisection: owns the accumulated revision data, steers the
/// binary search, and recurses into dependency repositories when the
/// narrowed range turns out to be a roll.
///
/// All interaction with the outside world goes through the two seams handed
/// to the constructor: a [`SourceControl`] for revision enumeration and a
/// [`RevisionEvaluator`] that syncs, builds and measures one revision at a
/// time.
pub struct BisectDriver<'a, S: SourceControl, E: RevisionEvaluator> {
    config: &'a BisectConfig,
    source_control: S,
    evaluator: E,
    /// Root directory holding the depot checkouts
    root: PathBuf,
    warnings: Vec<String>,
}

impl<'a, S: SourceControl, E: RevisionEvaluator> BisectDriver<'a, S, E> {
    pub fn new(config: &'a BisectConfig, source_control: S, evaluator: E, root: PathBuf) -> Self {
        Self {
            config,
            source_control,
            evaluator,
            root,
            warnings: Vec::new(),
        }
    }

    /// Run the bisection to completion.
    ///
    /// Environment and reference-value failures are errors; build and test
    /// failures at individual revisions are recorded and searched around.
    pub fn run(mut self) -> Result<BisectResults> {
        let options = &self.config.options;
        let registry = &self.config.depots;
        let annotate = options.output_buildbot_annotations;

        let target_depot = registry.base.clone();
        let base_dir = registry.directory(&self.root, &target_depot)?;
        let svn_url = registry
            .base_info()
            .svn_url
            .clone()
            .unwrap_or_default();

        // Legacy numeric revisions are matched to hashes here; hashes pass
        // through untouched.
        let bad_revision = self
            .source_control
            .resolve_to_revision(&options.bad_revision, &svn_url, 100, &base_dir)
            .with_context(|| {
                format!("Couldn't resolve [{}] to a revision hash.", options.bad_revision)
            })?;
        let good_revision = self
            .source_control
            .resolve_to_revision(&options.good_revision, &svn_url, -100, &base_dir)
            .with_context(|| {
                format!("Couldn't resolve [{}] to a revision hash.", options.good_revision)
            })?;

        let good_time = self.source_control.commit_time(&good_revision, &base_dir)?;
        let bad_time = self.source_control.commit_time(&bad_revision, &base_dir)?;
        if good_time > bad_time {
            anyhow::bail!("bad_revision < good_revision, did you swap these by mistake?");
        }

        if annotate {
            annotations::step_start("Gathering Revisions");
        }
        info!("Gathering revision range for bisection.");

        let mut revision_list =
            self.source_control
                .revision_list(&bad_revision, &good_revision, &base_dir)?;

        if annotate {
            annotations::step_closed();
        }

        if revision_list.is_empty() {
            anyhow::bail!(
                "An error occurred attempting to retrieve revision range: \
                 [{good_revision}..{bad_revision}]"
            );
        }

        let mut revision_data = RevisionMap::new();
        for (i, revision) in revision_list.iter().enumerate() {
            revision_data.insert(
                revision.clone(),
                RevisionData::new(revision.clone(), &target_depot, i + 1),
            );
        }

        let mut min_revision = 0usize;
        let mut max_revision = revision_list.len() - 1;

        self.print_revision_range(&revision_list, &target_depot);

        if annotate {
            annotations::step_start("Gathering Reference Values");
        }
        info!("Gathering reference values for bisection.");

        let bad_value = self.evaluate_reference(
            &revision_list[0].clone(),
            &target_depot,
            "bad",
            &mut revision_data,
            RevisionState::Failed,
        )?;
        let good_value = self.evaluate_reference(
            &revision_list[max_revision].clone(),
            &target_depot,
            "good",
            &mut revision_data,
            RevisionState::Passed,
        )?;

        if annotate {
            annotations::step_closed();
        }

        let known_bad_metrics = bad_value.metrics;
        let known_good_metrics = good_value.metrics;

        if known_bad_metrics == known_good_metrics {
            self.warnings.push(
                "The good and bad reference values are identical; intermediate \
                 revisions cannot be classified reliably."
                    .to_string(),
            );
        }

        loop {
            if revision_list.is_empty() {
                break;
            }

            let min_data = revision_data[&revision_list[min_revision]].clone();
            let max_data = revision_data[&revision_list[max_revision]].clone();

            let next_revision_index;
            if max_revision - min_revision <= 1 {
                // The window has collapsed; either an endpoint of a spliced
                // range still needs a sample, or the search dives into a
                // dependency, or it is over.
                if min_data.state == RevisionState::Unknown {
                    next_revision_index = min_revision;
                } else if max_data.state == RevisionState::Unknown {
                    next_revision_index = max_revision;
                } else if self.is_recursion_parent(&min_data.depot) {
                    let Some(external_depot) =
                        self.find_next_depot_to_bisect(&min_data, &max_data)
                    else {
                        break;
                    };

                    // min is the newer (bad) boundary, max the older (good)
                    let latest = min_data.external.as_ref().unwrap()[&external_depot].clone();
                    let earliest = max_data.external.as_ref().unwrap()[&external_depot].clone();

                    let new_revision_list =
                        self.prepare_to_bisect_on_depot(&external_depot, &latest, &earliest)?;
                    if new_revision_list.is_empty() {
                        anyhow::bail!(
                            "An error occurred attempting to retrieve revision range: \
                             [{earliest}..{latest}]"
                        );
                    }

                    add_revisions(
                        &mut revision_data,
                        &new_revision_list,
                        &external_depot,
                        min_data.sort,
                    );

                    info!(
                        "Regression in metric {} appears to be the result of changes in [{}].",
                        options.metric, external_depot
                    );
                    self.print_revision_range(&new_revision_list, &external_depot);

                    // Restart the search inside the spliced range
                    revision_list = new_revision_list;
                    min_revision = 0;
                    max_revision = revision_list.len() - 1;
                    continue;
                } else {
                    break;
                }
            } else {
                next_revision_index = (max_revision - min_revision) / 2 + min_revision;
            }

            let next_revision_id = revision_list[next_revision_index].clone();
            let next_depot = revision_data[&next_revision_id].depot.clone();

            if annotate {
                annotations::step_start(&format!("Working on [{next_revision_id}]"));
            }
            info!("Working on revision: [{next_revision_id}]");

            let outcome = self.evaluator.evaluate(&next_revision_id, &next_depot, true);
            match outcome {
                RunOutcome::Success {
                    value,
                    external,
                    build_time_secs,
                    perf_time_secs,
                } => {
                    let passed =
                        check_if_run_passed(&value.metrics, &known_good_metrics, &known_bad_metrics);

                    let data = revision_data.get_mut(&next_revision_id).unwrap();
                    data.external = external;
                    data.build_time_secs = build_time_secs;
                    data.perf_time_secs = perf_time_secs;
                    data.state = if passed {
                        RevisionState::Passed
                    } else {
                        RevisionState::Failed
                    };
                    data.value = Some(value);

                    if passed {
                        max_revision = next_revision_index;
                    } else {
                        min_revision = next_revision_index;
                    }
                }
                RunOutcome::Skipped => {
                    info!("Skipped revision: [{next_revision_id}]");
                    revision_data.get_mut(&next_revision_id).unwrap().state =
                        RevisionState::Skipped;
                    revision_list.remove(next_revision_index);
                    max_revision = max_revision.saturating_sub(1);
                }
                RunOutcome::BuildFailed(message) => {
                    warn!("{message}");
                    revision_data.get_mut(&next_revision_id).unwrap().state =
                        RevisionState::BuildFailed;
                    // A broken build cannot be bisected at this exact
                    // commit; shrink the window around it.
                    revision_list.remove(next_revision_index);
                    max_revision = max_revision.saturating_sub(1);
                }
                RunOutcome::TestFailed { message, metrics } => {
                    warn!("{message}");
                    let data = revision_data.get_mut(&next_revision_id).unwrap();
                    data.state = RevisionState::TestFailed;
                    data.value = Some(RunValue {
                        metrics,
                        samples: Vec::new(),
                        mean: 0.0,
                        std_dev: 0.0,
                        std_err: 0.0,
                    });
                    revision_list.remove(next_revision_index);
                    max_revision = max_revision.saturating_sub(1);
                }
            }

            if annotate {
                annotations::step_closed();
            }
        }

        Ok(BisectResults::new(
            revision_data,
            self.warnings,
            &self.config.options,
        ))
    }

    /// Measure one reference endpoint; any failure here aborts the run,
    /// since without both references nothing can be classified.
    fn evaluate_reference(
        &mut self,
        revision: &str,
        depot: &str,
        which: &str,
        revision_data: &mut RevisionMap,
        state: RevisionState,
    ) -> Result<RunValue> {
        match self.evaluator.evaluate(revision, depot, false) {
            RunOutcome::Success {
                value,
                external,
                build_time_secs,
                perf_time_secs,
            } => {
                let data = revision_data.get_mut(revision).unwrap();
                data.external = external;
                data.build_time_secs = build_time_secs;
                data.perf_time_secs = perf_time_secs;
                data.state = state;
                data.value = Some(value.clone());
                Ok(value)
            }
            RunOutcome::BuildFailed(message) | RunOutcome::TestFailed { message, .. } => {
                anyhow::bail!(
                    "An error occurred while building and running the '{which}' reference \
                     value. The bisect cannot continue without a working '{which}' revision \
                     to start from.\n\nError: {message}"
                )
            }
            RunOutcome::Skipped => {
                anyhow::bail!("Reference revision [{revision}] was unexpectedly skipped.")
            }
        }
    }

    /// Whether any tracked depot can be reached from `depot`, i.e. whether
    /// collapsing a window here may still hide a dependency roll.
    fn is_recursion_parent(&self, depot: &str) -> bool {
        self.config
            .depots
            .names()
            .filter_map(|name| self.config.depots.get(name))
            .any(|info| info.recurse && info.from.iter().any(|parent| parent == depot))
    }

    /// Which dependency changed between the two boundary revisions, if any
    fn find_next_depot_to_bisect(
        &self,
        min_data: &RevisionData,
        max_data: &RevisionData,
    ) -> Option<String> {
        let registry = &self.config.depots;

        for name in registry.names() {
            let info = registry.get(name)?;
            if !info.recurse || !info.from.iter().any(|parent| parent == &min_data.depot) {
                continue;
            }

            let min_external = min_data.external.as_ref().and_then(|e| e.get(name));
            let max_external = max_data.external.as_ref().and_then(|e| e.get(name));

            if min_external == max_external {
                continue;
            }

            if min_external.is_some() && max_external.is_some() {
                return Some(name.to_string());
            }
        }

        None
    }

    /// Gather the revision range of a dependency between its two pinned
    /// boundary revisions.
    fn prepare_to_bisect_on_depot(
        &self,
        depot: &str,
        end_revision: &str,
        start_revision: &str,
    ) -> Result<Vec<String>> {
        let depot_dir = self.config.depots.directory(&self.root, depot)?;
        self.source_control
            .revision_list(end_revision, start_revision, &depot_dir)
    }

    fn print_revision_range(&self, revisions: &[String], depot: &str) {
        if self.config.options.output_buildbot_annotations {
            annotations::step_start(&format!(
                "Bisection Range: [{} - {}]",
                revisions.last().map(String::as_str).unwrap_or_default(),
                revisions.first().map(String::as_str).unwrap_or_default()
            ));
        }

        info!("Revisions to bisect on [{depot}]:");
        for revision in revisions {
            info!("  -> {revision}");
        }

        if self.config.options.output_buildbot_annotations {
            annotations::step_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric_map(pairs: &[(&str, f64)]) -> MetricMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_check_if_run_passed_exact_references() {
        let good = metric_map(&[("times/t", 1.0), ("times/t2", 5.0)]);
        let bad = metric_map(&[("times/t", 10.0), ("times/t2", 50.0)]);

        assert!(check_if_run_passed(&good.clone(), &good, &bad));
        assert!(!check_if_run_passed(&bad.clone(), &good, &bad));
    }

    #[test]
    fn test_check_if_run_passed_majority_vote() {
        let good = metric_map(&[("a/x", 1.0), ("a/y", 1.0), ("a/z", 1.0)]);
        let bad = metric_map(&[("a/x", 10.0), ("a/y", 10.0), ("a/z", 10.0)]);

        // Two of three keys closer to good
        let sample = metric_map(&[("a/x", 2.0), ("a/y", 3.0), ("a/z", 9.0)]);
        assert!(check_if_run_passed(&sample, &good, &bad));

        // Two of three keys closer to bad
        let sample = metric_map(&[("a/x", 2.0), ("a/y", 8.0), ("a/z", 9.0)]);
        assert!(!check_if_run_passed(&sample, &good, &bad));
    }

    #[test]
    fn test_check_if_run_passed_ties_fail() {
        let good = metric_map(&[("a/x", 5.0)]);
        let bad = metric_map(&[("a/x", 5.0)]);
        let sample = metric_map(&[("a/x", 5.0)]);

        assert!(!check_if_run_passed(&sample, &good, &bad));
    }

    #[test]
    fn test_check_if_run_passed_ignores_unmatched_keys() {
        let good = metric_map(&[("a/x", 1.0)]);
        let bad = metric_map(&[("a/x", 10.0)]);
        let sample = metric_map(&[("a/x", 2.0), ("a/other", 99.0)]);

        assert!(check_if_run_passed(&sample, &good, &bad));
    }
}
