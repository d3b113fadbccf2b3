use serde::Serialize;
use std::collections::BTreeMap;

use crate::bisect::metrics::MetricMap;

/// Classification of one revision over the course of the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RevisionState {
    /// Not yet visited
    Unknown,
    /// Metric classified as closer to the known-good reference
    Passed,
    /// Metric classified as closer to the known-bad reference
    Failed,
    /// The build broke at this revision; excluded from the search space
    BuildFailed,
    /// The test ran but produced no parseable metric; excluded likewise
    TestFailed,
    /// DEPS-only roll with no effect on the checkout; excluded
    Skipped,
}

impl RevisionState {
    /// Short label used in the tested-commits table
    pub fn label(&self) -> &'static str {
        match self {
            RevisionState::Unknown => "?",
            RevisionState::Passed => "good",
            RevisionState::Failed => "bad",
            RevisionState::BuildFailed => "build failure",
            RevisionState::TestFailed => "test failure",
            RevisionState::Skipped => "skipped",
        }
    }

    /// Whether this revision was thrown out of the search window
    pub fn is_excluded(&self) -> bool {
        matches!(
            self,
            RevisionState::BuildFailed | RevisionState::TestFailed | RevisionState::Skipped
        )
    }
}

/// Measured outcome of the performance runs at one revision
#[derive(Debug, Clone, Serialize)]
pub struct RunValue {
    /// Per-key metric values, averaged across repeats
    pub metrics: MetricMap,
    /// Raw per-repeat samples of the requested metric
    pub samples: Vec<f64>,
    /// Truncated mean of `samples`
    pub mean: f64,
    pub std_dev: f64,
    pub std_err: f64,
}

/// Everything known about one commit under consideration.
///
/// Created when its range is enumerated, mutated as the search visits it,
/// and accumulated into the final report; never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct RevisionData {
    pub revision_id: String,
    /// Which repository this revision belongs to
    pub depot: String,
    pub state: RevisionState,
    pub value: Option<RunValue>,
    /// Pinned revisions of tracked dependencies at this commit; only
    /// populated for base-depot revisions
    pub external: Option<BTreeMap<String, String>>,
    /// Position in commit order, kept consistent as dependency ranges are
    /// spliced into the search
    pub sort: usize,
    pub build_time_secs: f64,
    pub perf_time_secs: f64,
}

impl RevisionData {
    pub fn new(revision_id: impl Into<String>, depot: impl Into<String>, sort: usize) -> Self {
        Self {
            revision_id: revision_id.into(),
            depot: depot.into(),
            state: RevisionState::Unknown,
            value: None,
            external: None,
            sort,
            build_time_secs: 0.0,
            perf_time_secs: 0.0,
        }
    }
}

/// Accumulated per-revision data for the whole run, keyed by revision id
pub type RevisionMap = BTreeMap<String, RevisionData>;

/// Splice a depot's revision range into the accumulated data at position
/// `sort`. Existing entries past the insertion point shift by the length of
/// the new range, so `sort` stays a total order with the spliced revisions
/// nested exactly where the ambiguous step was.
pub fn add_revisions(
    revision_data: &mut RevisionMap,
    revisions: &[String],
    depot: &str,
    sort: usize,
) {
    let count = revisions.len();

    for data in revision_data.values_mut() {
        if data.sort > sort {
            data.sort += count;
        }
    }

    for (i, revision) in revisions.iter().enumerate() {
        revision_data.insert(
            revision.clone(),
            RevisionData::new(revision.clone(), depot, sort + i + 1),
        );
    }
}

/// All revisions ordered by their sort position
pub fn sorted_revisions(revision_data: &RevisionMap) -> Vec<&RevisionData> {
    let mut revisions: Vec<&RevisionData> = revision_data.values().collect();
    revisions.sort_by_key(|data| data.sort);
    revisions
}
