use anyhow::Result;
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::bisect::deps;
use crate::bisect::metrics::{
    self, parse_metric_output, MetricMap, MetricParseError, MetricSpec,
};
use crate::bisect::revision::RunValue;
use crate::command::CommandRunner;
use crate::config::{BisectConfig, BuildPreference};
use crate::source_control::SourceControl;

/// What happened when one revision was synced, built and measured
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The revision built and the test produced a classifiable value
    Success {
        value: RunValue,
        /// Pinned dependency revisions at this commit (base depot only)
        external: Option<BTreeMap<String, String>>,
        build_time_secs: f64,
        perf_time_secs: f64,
    },
    /// Sync or build broke; the revision is excluded from the search
    BuildFailed(String),
    /// The test ran but its output had no usable metric; whatever was
    /// scraped is kept for the report
    TestFailed { message: String, metrics: MetricMap },
    /// A roll-only commit with no effect on this checkout
    Skipped,
}

/// The seam between the search algorithm and the outside world.
///
/// The driver hands an implementation one revision at a time and steers the
/// search purely on the outcome, which keeps the binary search testable
/// without a checkout, a build system, or a real performance test.
pub trait RevisionEvaluator {
    fn evaluate(&mut self, revision: &str, depot: &str, skippable: bool) -> RunOutcome;
}

/// Finds every `(depot, revision)` pair that must be synced for `revision`.
///
/// A depot that is a split mirror of one upstream repository (e.g. skia's
/// src/include/gyp trio) cannot be moved alone: the sibling mirrors have no
/// guarantee of carrying the exact same upstream revision, so each sibling
/// is resolved by searching backward from the upstream revision number until
/// a commit exists. `None` means some sibling could not be resolved and the
/// revision cannot be synced consistently.
pub fn find_all_revisions_to_sync(
    source_control: &dyn SourceControl,
    config: &BisectConfig,
    root: &Path,
    depot: &str,
    revision: &str,
) -> Option<Vec<(String, String)>> {
    let mut to_sync = vec![(depot.to_string(), revision.to_string())];

    let registry = &config.depots;
    let info = registry.get(depot)?;

    if registry.is_base(depot) || info.depends.is_empty() {
        return Some(to_sync);
    }

    let depot_dir = registry.directory(root, depot).ok()?;
    let upstream_rev = source_control.svn_find_rev(revision, &depot_dir)?;

    for sibling in &info.depends {
        let sibling_info = registry.get(sibling)?;
        let sibling_dir = registry.directory(root, sibling).ok()?;
        let svn_url = sibling_info.svn_url.as_deref()?;

        let resolved = source_control.resolve_to_revision(
            &upstream_rev.to_string(),
            svn_url,
            -1000,
            &sibling_dir,
        )?;
        to_sync.push((sibling.clone(), resolved));
    }

    Some(to_sync)
}

/// Compiles the configured target at whatever revision the checkout is on
pub struct Builder<'a> {
    config: &'a BisectConfig,
}

impl<'a> Builder<'a> {
    pub fn new(config: &'a BisectConfig) -> Self {
        Self { config }
    }

    /// Build in `build_dir`, reporting success. A failed build is a
    /// per-revision condition the search narrows around, never an error.
    pub fn build(&self, build_dir: &Path) -> bool {
        let options = &self.config.options;
        let runner = CommandRunner::in_dir(build_dir).label("build step");

        let mut args: Vec<&str>;
        let cmd = match options.build_preference {
            BuildPreference::Ninja => {
                args = vec!["-C", "out/Release"];
                if options.use_goma {
                    // goma fans compiles out to a remote pool, so keep far
                    // more jobs in flight than there are local cores
                    args.extend(["-j", "200"]);
                }
                args.push(&options.build_target);
                "ninja"
            }
            BuildPreference::Make => {
                args = vec!["BUILDTYPE=Release"];
                if options.use_goma {
                    args.extend(["-j", "200"]);
                }
                args.push(&options.build_target);
                "make"
            }
        };

        match runner.run_streaming(cmd, &args) {
            Ok(status) => status.success(),
            Err(err) => {
                warn!("Build could not start: {err:#}");
                false
            }
        }
    }
}

/// Production [`RevisionEvaluator`]: sync every depot the revision needs,
/// build, run the performance command, scrape its output.
pub struct SyncBuildRunEvaluator<'a, S: SourceControl> {
    config: &'a BisectConfig,
    source_control: S,
    root: PathBuf,
    metric: MetricSpec,
}

impl<'a, S: SourceControl> SyncBuildRunEvaluator<'a, S> {
    pub fn new(
        config: &'a BisectConfig,
        source_control: S,
        root: PathBuf,
    ) -> Result<Self> {
        let metric: MetricSpec = config.options.metric.parse()?;

        Ok(Self {
            config,
            source_control,
            root,
            metric,
        })
    }

    fn base_dir(&self) -> PathBuf {
        self.root.join(&self.config.depots.base_info().src)
    }

    fn sync_all(&self, to_sync: &[(String, String)]) -> bool {
        let registry = &self.config.depots;

        for (depot, revision) in to_sync {
            let Some(info) = registry.get(depot) else {
                return false;
            };
            let dir = self.root.join(&info.src);

            let use_gclient = info.gclient_sync;
            let revision_spec = if use_gclient {
                // gclient wants the depot path in the revision spec so the
                // whole dependency graph follows, e.g. src@<SHA1>
                format!("{}@{}", info.src.display(), revision)
            } else {
                revision.clone()
            };

            info!("Syncing [{depot}] to revision [{revision}]");
            if !self
                .source_control
                .sync_to_revision(&revision_spec, use_gclient, &dir)
            {
                return false;
            }
        }

        true
    }

    /// DEPS-only rolls have no effect on a git checkout and can be skipped
    /// without testing.
    fn should_skip(&self, revision: &str, depot: &str) -> bool {
        if !self.config.depots.is_base(depot) {
            return false;
        }

        match self.source_control.changed_files(revision, &self.base_dir()) {
            Ok(files) => files.len() == 1 && files[0] == deps::DEPS_FILE,
            Err(_) => false,
        }
    }

    /// Run the performance command up to `repeat_test_count` times and fold
    /// the scraped values into one `RunValue`.
    fn run_performance_test(&self) -> Result<RunValue, String> {
        let options = &self.config.options;

        if options.debug_ignore_perf_test {
            let mut fake = MetricMap::new();
            fake.insert(self.metric.key(), 0.0);
            return Ok(RunValue {
                metrics: fake,
                samples: vec![0.0],
                mean: 0.0,
                std_dev: 0.0,
                std_err: 0.0,
            });
        }

        let runner = CommandRunner::in_dir(self.base_dir()).label("performance test");
        let start = Instant::now();

        let mut samples: Vec<f64> = Vec::new();
        let mut observed: BTreeMap<String, Vec<f64>> = BTreeMap::new();

        for _ in 0..options.repeat_test_count {
            let output = runner.run_shell(&options.command).map_err(|err| {
                format!(
                    "Something went wrong running the performance test. \
                     Please review the command line:\n\n{}\n({err:#})",
                    options.command
                )
            })?;

            let text = String::from_utf8_lossy(&output.stdout);
            if options.output_buildbot_annotations {
                println!("{text}");
            }

            match parse_metric_output(&self.metric, &text) {
                Ok(parsed) => {
                    samples.extend(&parsed.values);
                    for (key, value) in parsed.metrics {
                        observed.entry(key).or_default().push(value);
                    }
                }
                Err(MetricParseError::MetricNotFound(_)) if samples.is_empty() => break,
                Err(_) => {}
            }

            let elapsed_minutes = start.elapsed().as_secs_f64() / 60.0;
            if elapsed_minutes >= options.max_time_minutes {
                break;
            }
        }

        if samples.is_empty() {
            return Err(format!(
                "Metric {} was not found in the test output.",
                self.metric
            ));
        }

        let mean = metrics::truncated_mean(&samples, options.truncate_fraction());
        let std_dev = metrics::standard_deviation(&samples);
        let std_err = metrics::standard_error(&samples);

        info!("Results of performance test: {mean:12.6} {std_err:12.6}");

        Ok(RunValue {
            metrics: observed
                .into_iter()
                .map(|(key, values)| {
                    let value = metrics::mean(&values);
                    (key, value)
                })
                .collect(),
            samples,
            mean,
            std_dev,
            std_err,
        })
    }
}

impl<S: SourceControl> RevisionEvaluator for SyncBuildRunEvaluator<'_, S> {
    fn evaluate(&mut self, revision: &str, depot: &str, skippable: bool) -> RunOutcome {
        let options = &self.config.options;

        let Some(to_sync) = find_all_revisions_to_sync(
            &self.source_control,
            self.config,
            &self.root,
            depot,
            revision,
        ) else {
            return RunOutcome::BuildFailed("Failed to resolve dependant depots.".to_string());
        };

        if !options.debug_ignore_sync && !self.sync_all(&to_sync) {
            return RunOutcome::BuildFailed(format!("Failed to sync revision: [{revision}]"));
        }

        if skippable && self.should_skip(revision, depot) {
            return RunOutcome::Skipped;
        }

        let build_start = Instant::now();
        if !options.debug_ignore_build && !Builder::new(self.config).build(&self.base_dir()) {
            return RunOutcome::BuildFailed(format!("Failed to build revision: [{revision}]"));
        }
        let build_time_secs = build_start.elapsed().as_secs_f64();

        let perf_start = Instant::now();
        let value = match self.run_performance_test() {
            Ok(value) => value,
            Err(message) => {
                return RunOutcome::TestFailed {
                    message,
                    metrics: MetricMap::new(),
                }
            }
        };
        let perf_time_secs = perf_start.elapsed().as_secs_f64();

        let external = if self.config.depots.is_base(depot) {
            match deps::external_revisions(&self.base_dir(), depot, &self.config.depots) {
                Ok(revisions) => Some(revisions),
                Err(err) => {
                    return RunOutcome::BuildFailed(format!(
                        "Failed to parse dependency file for external revisions: {err:#}"
                    ));
                }
            }
        } else {
            None
        };

        RunOutcome::Success {
            value,
            external,
            build_time_secs,
            perf_time_secs,
        }
    }
}
