use anyhow::Result;
use bisectkit::{
    annotations,
    bisect::{BisectDriver, SyncBuildRunEvaluator},
    config::{
        load_depot_config, BisectConfig, BisectOptions, BuildPreference, Configuration,
        DepotRegistry,
    },
    path_utils, repository,
    source_control::{GitSourceControl, SourceControl, EXPECTED_BRANCH},
    system_info,
};

use clap::Parser;
use env_logger::Env;
use log::info;
use std::{path::PathBuf, process};

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Bisect a performance regression to a single commit.\n\n\
        Starts from a known-bad revision where a performance metric has \
        regressed and a last known-good revision, then binary searches the \
        range by syncing, building and running the performance test at each \
        step. When the culprit turns out to be a roll of a tracked dependency \
        repository, the search recurses into that repository's revisions."
)]
struct Cli {
    /// Performance test command; must print `RESULT <graph>: <trace>= <value> <units>` lines
    #[arg(short = 'c', long)]
    command: String,

    /// A revision where the regression has already occurred
    #[arg(short = 'b', long)]
    bad_revision: String,

    /// The last known good revision
    #[arg(short = 'g', long)]
    good_revision: String,

    /// Metric to bisect on, as <graph>/<trace>
    #[arg(short = 'm', long)]
    metric: String,

    /// Root directory containing the depot checkouts (defaults to the
    /// current directory)
    #[arg(short = 'w', long)]
    working_directory: Option<PathBuf>,

    /// Local path or git URL used to create the base checkout if the
    /// working directory doesn't hold one yet
    #[arg(long)]
    source: Option<String>,

    /// Build tool to compile each candidate revision with
    #[arg(long, value_enum, default_value = "ninja")]
    build_preference: BuildPreference,

    /// Target passed to the build tool
    #[arg(long, default_value = "chrome")]
    build_target: String,

    /// Raise build parallelism for goma-backed compiles
    #[arg(long)]
    use_goma: bool,

    /// Times the performance test runs per revision
    #[arg(short = 'r', long, default_value_t = 20)]
    repeat_test_count: usize,

    /// Percent of outliers discarded from each end when averaging samples
    #[arg(short = 't', long, default_value_t = 25.0)]
    truncate_percent: f64,

    /// Cap on minutes spent repeating the test at one revision
    #[arg(long, default_value_t = 20.0)]
    max_time_minutes: f64,

    /// YAML file overriding the built-in depot table
    #[arg(long)]
    depot_config: Option<PathBuf>,

    /// Directory receiving results.json and a host info dump
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// Emit buildbot step annotations around each phase
    #[arg(long)]
    output_buildbot_annotations: bool,

    /// Skip the build step (assume binaries are current)
    #[arg(long)]
    debug_ignore_build: bool,

    /// Skip syncing revisions (operate on the current checkout)
    #[arg(long)]
    debug_ignore_sync: bool,

    /// Skip the performance test and substitute zero-valued samples
    #[arg(long)]
    debug_ignore_perf_test: bool,
}

impl Cli {
    fn into_options(self) -> BisectOptions {
        BisectOptions {
            command: self.command,
            metric: self.metric,
            bad_revision: self.bad_revision,
            good_revision: self.good_revision,
            working_directory: self.working_directory,
            source: self.source,
            build_preference: self.build_preference,
            build_target: self.build_target,
            use_goma: self.use_goma,
            repeat_test_count: self.repeat_test_count,
            truncate_percent: self.truncate_percent,
            max_time_minutes: self.max_time_minutes,
            output_buildbot_annotations: self.output_buildbot_annotations,
            output_dir: self.output_dir,
            debug_ignore_build: self.debug_ignore_build,
            debug_ignore_sync: self.debug_ignore_sync,
            debug_ignore_perf_test: self.debug_ignore_perf_test,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // Argument errors exit 1; --help and --version exit 0
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let is_usage_error = err.use_stderr();
        let _ = err.print();
        process::exit(if is_usage_error { 1 } else { 0 });
    });

    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let depot_config = cli.depot_config.clone();
    let options = cli.into_options();

    let depots = match &depot_config {
        Some(path) => load_depot_config(path)?,
        None => DepotRegistry::builtin(),
    };

    let config = BisectConfig { options, depots };
    config.validate()?;

    let root = match &config.options.working_directory {
        Some(dir) => path_utils::resolve_path(dir, true)?,
        None => std::env::current_dir()?,
    };

    let base_dir = repository::ensure_base_checkout(
        &root,
        &config.depots.base_info().src,
        config.options.source.as_deref(),
    )?;

    // gclient refuses to sync a checkout that is on another branch, so fail
    // before any work starts rather than mid-search.
    let source_control = GitSourceControl::new();
    if !config.options.debug_ignore_sync && !source_control.is_in_proper_branch(&base_dir)? {
        anyhow::bail!(
            "The base checkout must be on the [{EXPECTED_BRANCH}] branch to bisect."
        );
    }

    if let Some(output_dir) = &config.options.output_dir {
        path_utils::ensure_directory(output_dir)?;
        system_info::dump_sys_info(&output_dir.join("system_info"))?;
    }

    let evaluator = SyncBuildRunEvaluator::new(&config, GitSourceControl::new(), root.clone())?;
    let driver = BisectDriver::new(&config, GitSourceControl::new(), evaluator, root.clone());
    let results = driver.run()?;

    if config.options.output_buildbot_annotations {
        annotations::step_start("Results");
    }
    results.print(&source_control, &config.depots, &root);
    if config.options.output_buildbot_annotations {
        annotations::step_closed();
    }

    if let Some(output_dir) = &config.options.output_dir {
        let results_path = output_dir.join("results.json");
        results.export_json(&results_path)?;
        info!("Results written to {results_path:?}");
    }

    Ok(())
}
