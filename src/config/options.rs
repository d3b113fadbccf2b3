use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::config::traits::Configuration;

/// Build tool used to compile each candidate revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuildPreference {
    #[default]
    Ninja,
    Make,
}

/// Every tunable of one bisection run.
///
/// Collected from the command line, validated once up front, and then passed
/// by reference into the driver; nothing mutates it after startup.
#[derive(Debug, Clone, Serialize)]
pub struct BisectOptions {
    /// Performance test command; must print `RESULT <graph>: <trace>= ...` lines
    pub command: String,
    /// Metric to bisect on, as `<graph>/<trace>`
    pub metric: String,
    /// A revision where the regression has already occurred
    pub bad_revision: String,
    /// The last known good revision
    pub good_revision: String,
    /// Root directory containing the depot checkouts; defaults to the
    /// current directory
    pub working_directory: Option<PathBuf>,
    /// Local path or git URL used to bootstrap the base depot checkout when
    /// the working directory is empty
    pub source: Option<String>,
    /// Build tool invoked for each candidate revision
    pub build_preference: BuildPreference,
    /// Target passed to the build tool
    pub build_target: String,
    /// Raise build parallelism for goma-backed compiles
    pub use_goma: bool,
    /// Number of times the performance test runs per revision
    pub repeat_test_count: usize,
    /// Percent of outliers discarded from each end when averaging samples
    pub truncate_percent: f64,
    /// Cap on the total time spent repeating the test at one revision
    pub max_time_minutes: f64,
    /// Emit buildbot step annotations around each phase
    pub output_buildbot_annotations: bool,
    /// Directory receiving results.json and the host info dump
    pub output_dir: Option<PathBuf>,
    /// Skip the build step (assume binaries are current)
    pub debug_ignore_build: bool,
    /// Skip syncing revisions (operate on the current checkout)
    pub debug_ignore_sync: bool,
    /// Skip the performance test and substitute zero-valued samples
    pub debug_ignore_perf_test: bool,
}

impl Default for BisectOptions {
    fn default() -> Self {
        Self {
            command: String::new(),
            metric: String::new(),
            bad_revision: String::new(),
            good_revision: String::new(),
            working_directory: None,
            source: None,
            build_preference: BuildPreference::default(),
            build_target: "chrome".to_string(),
            use_goma: false,
            repeat_test_count: 20,
            truncate_percent: 25.0,
            max_time_minutes: 20.0,
            output_buildbot_annotations: false,
            output_dir: None,
            debug_ignore_build: false,
            debug_ignore_sync: false,
            debug_ignore_perf_test: false,
        }
    }
}

impl BisectOptions {
    /// Fraction of samples to discard from each end, derived from
    /// `truncate_percent`.
    pub fn truncate_fraction(&self) -> f64 {
        self.truncate_percent / 100.0
    }
}

impl Configuration for BisectOptions {
    fn config_type(&self) -> &str {
        "bisect options"
    }

    fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            anyhow::bail!("No performance test command specified");
        }

        if !self.metric.contains('/') || self.metric.split('/').any(|p| p.is_empty()) {
            anyhow::bail!(
                "Invalid metric specified: [{}], expected <graph>/<trace>",
                self.metric
            );
        }

        if self.bad_revision.is_empty() || self.good_revision.is_empty() {
            anyhow::bail!("Both a good and a bad revision must be specified");
        }

        if !(1..=100).contains(&self.repeat_test_count) {
            anyhow::bail!(
                "Invalid repeat count: [{}], must be between 1 and 100",
                self.repeat_test_count
            );
        }

        if !(0.0..=25.0).contains(&self.truncate_percent) {
            anyhow::bail!(
                "Invalid truncate percent: [{}], must be between 0 and 25",
                self.truncate_percent
            );
        }

        if !(1.0..=60.0).contains(&self.max_time_minutes) {
            anyhow::bail!(
                "Invalid max test time: [{}], must be between 1 and 60 minutes",
                self.max_time_minutes
            );
        }

        Ok(())
    }
}
