/// Dependency pin-file parsing
pub mod deps;

/// The binary search driver
pub mod driver;
pub use driver::{check_if_run_passed, BisectDriver};

/// Sync, build and measurement of one revision
pub mod evaluate;
pub use evaluate::{
    find_all_revisions_to_sync, Builder, RevisionEvaluator, RunOutcome, SyncBuildRunEvaluator,
};

/// Metric scraping and statistics
pub mod metrics;
pub use metrics::{parse_metric_output, MetricMap, MetricParseError, MetricSpec};

/// Per-revision bookkeeping
pub mod revision;
pub use revision::{RevisionData, RevisionMap, RevisionState, RunValue};

/// Final report assembly
pub mod report;
pub use report::BisectResults;
