use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::bisect::metrics::{confidence_score, mean};
use crate::bisect::revision::{sorted_revisions, RevisionData, RevisionMap, RevisionState};
use crate::config::{BisectOptions, DepotRegistry};
use crate::source_control::SourceControl;

/// A revision at one end of the narrowed range
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryRevision {
    pub revision_id: String,
    pub depot: String,
}

/// A possible second regression spotted away from the primary culprit
#[derive(Debug, Clone, Serialize)]
pub struct OtherRegression {
    pub current: String,
    pub previous: String,
    pub confidence: f64,
}

/// The complete outcome of one bisection, ready for printing and export.
///
/// `revision_data` holds every revision the search touched, in commit order
/// (spliced dependency ranges sit at the position of the roll that pulled
/// them in). The culprit is the span between `last_broken_revision` and
/// `first_working_revision`; the two may live in different depots when the
/// regression was traced into a dependency.
#[derive(Debug, Serialize)]
pub struct BisectResults {
    pub options: BisectOptions,
    pub revision_data: Vec<RevisionData>,
    pub warnings: Vec<String>,
    pub first_working_revision: Option<BoundaryRevision>,
    pub last_broken_revision: Option<BoundaryRevision>,
    /// Confidence that good and bad sample groups are truly distinct
    pub confidence: f64,
    /// Relative metric change from good to bad, as a percentage
    pub regression_size_percent: Option<f64>,
    pub other_regressions: Vec<OtherRegression>,
}

impl BisectResults {
    pub fn new(revision_data: RevisionMap, mut warnings: Vec<String>, options: &BisectOptions) -> Self {
        let sorted: Vec<RevisionData> = sorted_revisions(&revision_data)
            .into_iter()
            .cloned()
            .collect();

        let first_working_index = sorted
            .iter()
            .position(|data| data.state == RevisionState::Passed);
        let last_broken_index = sorted
            .iter()
            .rposition(|data| data.state == RevisionState::Failed);

        let boundary = |index: Option<usize>| {
            index.map(|i| BoundaryRevision {
                revision_id: sorted[i].revision_id.clone(),
                depot: sorted[i].depot.clone(),
            })
        };
        let first_working_revision = boundary(first_working_index);
        let last_broken_revision = boundary(last_broken_index);

        let mut confidence = 0.0;
        let mut regression_size_percent = None;
        let mut other_regressions = Vec::new();

        if let (Some(broken_index), Some(working_index)) = (last_broken_index, first_working_index)
        {
            let samples_of = |range: &[RevisionData]| -> Vec<Vec<f64>> {
                range
                    .iter()
                    .filter_map(|data| data.value.as_ref())
                    .map(|value| value.samples.clone())
                    .filter(|samples| !samples.is_empty())
                    .collect()
            };

            let broken_samples = samples_of(&sorted[..=broken_index]);
            let working_samples = samples_of(&sorted[working_index..]);

            confidence = confidence_score(&working_samples, &broken_samples);

            let broken_flat: Vec<f64> = broken_samples.iter().flatten().copied().collect();
            let working_flat: Vec<f64> = working_samples.iter().flatten().copied().collect();
            let (bad_mean, good_mean) = (mean(&broken_flat), mean(&working_flat));
            if good_mean != 0.0 {
                regression_size_percent = Some((bad_mean - good_mean) / good_mean * 100.0);
            }

            other_regressions = find_other_regressions(&sorted, bad_mean > good_mean);
        }

        if confidence < 50.0 && last_broken_index.is_some() {
            warnings.push(
                "Confidence is not high. Try bisecting again with increased repeat count \
                 or on another metric."
                    .to_string(),
            );
        }

        Self {
            options: options.clone(),
            revision_data: sorted,
            warnings,
            first_working_revision,
            last_broken_revision,
            confidence,
            regression_size_percent,
            other_regressions,
        }
    }

    /// Whether the search narrowed the regression down to a span
    pub fn culprit_found(&self) -> bool {
        self.first_working_revision.is_some() && self.last_broken_revision.is_some()
    }

    /// Print the full human-readable report to stdout
    pub fn print(
        &self,
        source_control: &dyn SourceControl,
        registry: &DepotRegistry,
        root: &Path,
    ) {
        self.print_banner();
        self.print_suspected_commits(source_control, registry, root);
        self.print_tested_commits();
        self.print_other_regressions();
        self.print_warnings();
    }

    fn print_banner(&self) {
        let status = if self.culprit_found() {
            "Positive: A suspected commit range was identified."
        } else {
            "Negative: The bisect could not identify a culprit."
        };

        println!();
        println!("===== BISECT JOB RESULTS =====");
        println!("Status: {status}");
        println!();
        println!("Test Command: {}", self.options.command);
        println!("Test Metric: {}", self.options.metric);
        if let Some(change) = self.regression_size_percent {
            println!("Relative Change: {change:+.2}%");
        }
        println!("Estimated Confidence: {:.0}%", self.confidence);
    }

    fn print_suspected_commits(
        &self,
        source_control: &dyn SourceControl,
        registry: &DepotRegistry,
        root: &Path,
    ) {
        let (Some(first_working), Some(last_broken)) = (
            self.position_of(self.first_working_revision.as_ref()),
            self.position_of(self.last_broken_revision.as_ref()),
        ) else {
            return;
        };

        // A noisy run can leave a passed revision above the last failed
        // one; there is no meaningful suspect span in that case.
        if last_broken >= first_working {
            return;
        }

        println!();
        println!("===== SUSPECTED CL(s) =====");

        // Everything from the deepest bad revision up to (but excluding)
        // the first good one is suspect; usually that is a single commit.
        for data in &self.revision_data[last_broken..first_working] {
            let info = registry
                .directory(root, &data.depot)
                .ok()
                .and_then(|dir| {
                    source_control
                        .query_revision_info(&data.revision_id, &dir)
                        .ok()
                })
                .unwrap_or_default();

            println!("Subject : {}", info.subject);
            println!("Author  : {} <{}>", info.author, info.email);
            println!("Commit  : {} ({})", data.revision_id, data.depot);
            println!("Date    : {}", info.date);
            println!();
        }
    }

    fn print_tested_commits(&self) {
        println!();
        println!("===== TESTED COMMITS =====");
        println!(
            "{:<20}{:<44}{:>14}{:>14}  {}",
            "Depot", "Commit SHA", "Mean", "Std. Error", "State"
        );

        for data in &self.revision_data {
            if data.state == RevisionState::Unknown {
                continue;
            }

            let (mean, std_err) = data
                .value
                .as_ref()
                .map(|value| (format!("{:.3}", value.mean), format!("{:.3}", value.std_err)))
                .unwrap_or_default();

            println!(
                "{:<20}{:<44}{:>14}{:>14}  {}",
                data.depot,
                data.revision_id,
                mean,
                std_err,
                data.state.label()
            );
        }
    }

    fn print_other_regressions(&self) {
        if self.other_regressions.is_empty() {
            return;
        }

        println!();
        println!("Other regressions may have occurred:");
        println!("  {:<46}{:<10}", "Commit", "Confidence");
        for regression in &self.other_regressions {
            println!(
                "  {:<46}{:<10.0}",
                regression.current, regression.confidence
            );
        }
    }

    fn print_warnings(&self) {
        if self.warnings.is_empty() {
            return;
        }

        println!();
        println!("WARNINGS:");
        for warning in &self.warnings {
            println!("  !!! {warning}");
        }
    }

    fn position_of(&self, boundary: Option<&BoundaryRevision>) -> Option<usize> {
        let boundary = boundary?;
        self.revision_data
            .iter()
            .position(|data| data.revision_id == boundary.revision_id)
    }

    /// Export the results as JSON
    pub fn export_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize results")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {path:?}"))?;

        Ok(())
    }
}

/// Scan commit order for additional boundaries where the metric moved in
/// the regression's direction with decent confidence. A second jump inside
/// the range often means the bisect landed on only one of several causes.
fn find_other_regressions(
    revision_data_sorted: &[RevisionData],
    bad_greater_than_good: bool,
) -> Vec<OtherRegression> {
    let mut other_regressions = Vec::new();
    let mut previous_samples: Vec<Vec<f64>> = Vec::new();
    let mut previous_id: Option<&str> = None;

    for data in revision_data_sorted {
        let Some(value) = &data.value else { continue };
        if value.samples.is_empty() {
            continue;
        }

        if !previous_samples.is_empty() {
            let confidence =
                confidence_score(&previous_samples, &[value.samples.clone()]);

            let previous_flat: Vec<f64> = previous_samples.iter().flatten().copied().collect();
            let previous_less = mean(&previous_flat) < mean(&value.samples);
            let is_same_direction = if bad_greater_than_good {
                previous_less
            } else {
                !previous_less
            };

            if is_same_direction && confidence > 50.0 {
                other_regressions.push(OtherRegression {
                    current: data.revision_id.clone(),
                    previous: previous_id.unwrap_or_default().to_string(),
                    confidence,
                });
            }
        }

        previous_samples.push(value.samples.clone());
        previous_id = Some(&data.revision_id);
    }

    other_regressions
}
