use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Metric keys mapped to their measured value for one revision
pub type MetricMap = BTreeMap<String, f64>;

/// A metric named as `<graph>/<trace>`, matching the legacy perf test
/// output convention `RESULT <graph>: <trace>= <value> <units>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSpec {
    pub graph: String,
    pub trace: String,
}

impl MetricSpec {
    pub fn new(graph: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            graph: graph.into(),
            trace: trace.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.graph, self.trace)
    }

    /// The page-load timing metric gets special treatment: its values sum
    /// across pages instead of averaging, and a `Pages:` marker splits them
    /// into per-page keys.
    pub fn is_page_timings(&self) -> bool {
        self.graph == "times" && self.trace == "t"
    }
}

impl FromStr for MetricSpec {
    type Err = MetricParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((graph, trace)) if !graph.is_empty() && !trace.is_empty() => {
                Ok(Self::new(graph, trace))
            }
            _ => Err(MetricParseError::InvalidMetricSpec(s.to_string())),
        }
    }
}

impl fmt::Display for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.graph, self.trace)
    }
}

/// Errors from scraping metric values out of performance test output.
///
/// The scraping is the one inherently fragile part of the pipeline, so it
/// lives behind this narrow interface and its own error taxonomy; the search
/// algorithm never sees raw test output.
#[derive(Debug, Error)]
pub enum MetricParseError {
    #[error("Invalid metric specified: [{0}], expected <graph>/<trace>")]
    InvalidMetricSpec(String),
    #[error("Metric [{0}] was not found in the test output")]
    MetricNotFound(String),
}

/// Metric values scraped from one performance test run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedMetrics {
    /// Per-key measured values for every trace of the requested graph
    pub metrics: MetricMap,
    /// Raw values of the requested metric, one entry per RESULT line value
    /// (summed per line for the page-timings metric)
    pub values: Vec<f64>,
}

/// Scrapes `RESULT` lines for one graph out of performance test output
struct ResultLineParser {
    single: Regex,
    multi: Regex,
    mean_stddev: Regex,
    pages: Regex,
}

impl ResultLineParser {
    fn new(graph: &str) -> Self {
        let prefix = format!(r"RESULT {}: (?P<trace>[^=]+)=", regex::escape(graph));

        Self {
            single: Regex::new(&format!(r"{prefix}\s*(?P<value>-?\d+(?:\.\d+)?)")).unwrap(),
            multi: Regex::new(&format!(r"{prefix}\s*\[\s*(?P<values>[-\d., ]+)\s*\]")).unwrap(),
            mean_stddev: Regex::new(&format!(
                r"{prefix}\s*\{{\s*(?P<mean>-?\d+(?:\.\d+)?)\s*,\s*(?P<stddev>\d+(?:\.\d+)?)\s*\}}"
            ))
            .unwrap(),
            pages: Regex::new(r"Pages:\s*\[\s*(?P<pages>[^\]]*)\]").unwrap(),
        }
    }
}

/// Parse performance test output into per-key metric values.
///
/// Handles the three `RESULT` line shapes (`<value>`, `[v1,v2,...]` and
/// `{<mean>, <stddev>}`) for every trace of the requested graph. For the
/// page-timings metric, a preceding `Pages: [...]` marker distributes list
/// values into per-page keys and the requested metric's value is the sum of
/// the page timings, matching the convention the try bots report.
///
/// The requested metric must appear in the output; other traces of the same
/// graph are collected opportunistically for classification votes.
pub fn parse_metric_output(
    metric: &MetricSpec,
    text: &str,
) -> Result<ParsedMetrics, MetricParseError> {
    let parser = ResultLineParser::new(&metric.graph);

    // key -> every value seen for it across the output
    let mut observed: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut primary_values = Vec::new();
    let mut pages: Vec<String> = Vec::new();

    for line in text.lines() {
        if let Some(captures) = parser.pages.captures(line) {
            pages = captures["pages"]
                .split(',')
                .map(|p| p.trim().trim_matches('\'').trim_matches('"').to_string())
                .filter(|p| !p.is_empty())
                .collect();
            continue;
        }

        let (trace, values) = if let Some(captures) = parser.multi.captures(line) {
            let values: Vec<f64> = captures["values"]
                .split(',')
                .filter_map(|v| v.trim().parse().ok())
                .collect();
            (captures["trace"].trim().to_string(), values)
        } else if let Some(captures) = parser.mean_stddev.captures(line) {
            let mean: f64 = captures["mean"].parse().unwrap_or(0.0);
            (captures["trace"].trim().to_string(), vec![mean])
        } else if let Some(captures) = parser.single.captures(line) {
            match captures["value"].parse() {
                Ok(value) => (captures["trace"].trim().to_string(), vec![value]),
                Err(_) => continue,
            }
        } else {
            continue;
        };

        if values.is_empty() {
            continue;
        }

        let is_primary = trace == metric.trace;
        let base_key = format!("{}/{}", metric.graph, trace);

        if is_primary && metric.is_page_timings() {
            if pages.len() == values.len() {
                for (page, value) in pages.iter().zip(&values) {
                    observed
                        .entry(format!("{base_key}/{page}"))
                        .or_default()
                        .push(*value);
                }
            } else {
                observed.entry(base_key).or_default().push(values.iter().sum());
            }
            primary_values.push(values.iter().sum());
        } else {
            let line_value = mean(&values);
            observed.entry(base_key).or_default().push(line_value);
            if is_primary {
                primary_values.push(line_value);
            }
        }
    }

    if primary_values.is_empty() {
        return Err(MetricParseError::MetricNotFound(metric.key()));
    }

    let metrics = observed
        .into_iter()
        .map(|(key, values)| {
            let value = mean(&values);
            (key, value)
        })
        .collect();

    Ok(ParsedMetrics {
        metrics,
        values: primary_values,
    })
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean with a fraction of outliers discarded from each end. Partially
/// discarded samples (when the cut lands between elements) are weighted by
/// the fraction kept, so the result varies continuously with the fraction.
pub fn truncated_mean(values: &[f64], truncate_fraction: f64) -> f64 {
    if values.len() <= 2 {
        return mean(values);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let discard = sorted.len() as f64 * truncate_fraction;
    let whole = discard.floor() as usize;
    let kept_weight = sorted.len() as f64 - discard * 2.0;

    let trimmed = &sorted[whole..sorted.len() - whole];
    let edge_weight = 1.0 - (discard - whole as f64);

    if edge_weight < 1.0 && trimmed.len() >= 2 {
        let inner: f64 = trimmed[1..trimmed.len() - 1].iter().sum();
        let edges = (trimmed[0] + trimmed[trimmed.len() - 1]) * edge_weight;
        (inner + edges) / kept_weight
    } else {
        mean(trimmed)
    }
}

/// Sample standard deviation
pub fn standard_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Standard error of the mean
pub fn standard_error(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    standard_deviation(values) / (values.len() as f64).sqrt()
}

// Two-tailed critical values of Student's t distribution. Rows are degrees
// of freedom, columns correspond to P_COLUMNS.
const P_COLUMNS: [f64; 7] = [0.20, 0.10, 0.05, 0.02, 0.01, 0.002, 0.001];
#[rustfmt::skip]
const T_TABLE: [(u32, [f64; 7]); 14] = [
    (1,  [3.078, 6.314, 12.706, 31.821, 63.657, 318.313, 636.619]),
    (2,  [1.886, 2.920, 4.303, 6.965, 9.925, 22.327, 31.599]),
    (3,  [1.638, 2.353, 3.182, 4.541, 5.841, 10.215, 12.924]),
    (4,  [1.533, 2.132, 2.776, 3.747, 4.604, 7.173, 8.610]),
    (5,  [1.476, 2.015, 2.571, 3.365, 4.032, 5.893, 6.869]),
    (6,  [1.440, 1.943, 2.447, 3.143, 3.707, 5.208, 5.959]),
    (7,  [1.415, 1.895, 2.365, 2.998, 3.499, 4.785, 5.408]),
    (8,  [1.397, 1.860, 2.306, 2.896, 3.355, 4.501, 5.041]),
    (9,  [1.383, 1.833, 2.262, 2.821, 3.250, 4.297, 4.781]),
    (10, [1.372, 1.812, 2.228, 2.764, 3.169, 4.144, 4.587]),
    (12, [1.356, 1.782, 2.179, 2.681, 3.055, 3.930, 4.318]),
    (15, [1.341, 1.753, 2.131, 2.602, 2.947, 3.733, 4.073]),
    (20, [1.325, 1.725, 2.086, 2.528, 2.845, 3.552, 3.850]),
    (30, [1.310, 1.697, 2.042, 2.457, 2.750, 3.385, 3.646]),
];

/// Approximate two-tailed p-value for Welch's t statistic via table lookup
fn lookup_p_value(t: f64, df: f64) -> f64 {
    let row = T_TABLE
        .iter()
        .rev()
        .find(|(table_df, _)| f64::from(*table_df) <= df)
        .map(|(_, row)| row)
        .unwrap_or(&T_TABLE[0].1);

    let t = t.abs();
    for (i, p) in P_COLUMNS.iter().enumerate().rev() {
        if t >= row[i] {
            return *p;
        }
    }

    1.0
}

/// A percentage expressing how confident we are that the good and bad
/// sample groups are distinct rather than noise, from Welch's t-test over
/// the flattened groups.
pub fn confidence_score(good_samples: &[Vec<f64>], bad_samples: &[Vec<f64>]) -> f64 {
    let good: Vec<f64> = good_samples.iter().flatten().copied().collect();
    let bad: Vec<f64> = bad_samples.iter().flatten().copied().collect();

    if good.is_empty() || bad.is_empty() {
        return 0.0;
    }

    let (m1, m2) = (mean(&good), mean(&bad));
    let (n1, n2) = (good.len() as f64, bad.len() as f64);
    let (v1, v2) = (
        standard_deviation(&good).powi(2),
        standard_deviation(&bad).powi(2),
    );

    let pooled = v1 / n1 + v2 / n2;
    if pooled == 0.0 {
        // No variance at all: distinct means are unambiguous
        return if m1 == m2 { 0.0 } else { 100.0 * (1.0 - P_COLUMNS[6]) };
    }

    let t = (m1 - m2) / pooled.sqrt();
    let df = if n1 > 1.0 && n2 > 1.0 {
        pooled.powi(2) / ((v1 / n1).powi(2) / (n1 - 1.0) + (v2 / n2).powi(2) / (n2 - 1.0))
    } else {
        1.0
    };

    100.0 * (1.0 - lookup_p_value(t, df.max(1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_spec_parsing() {
        let metric: MetricSpec = "shutdown/simple-user-quit".parse().unwrap();
        assert_eq!(metric.graph, "shutdown");
        assert_eq!(metric.trace, "simple-user-quit");
        assert_eq!(metric.key(), "shutdown/simple-user-quit");

        assert!("shutdown".parse::<MetricSpec>().is_err());
        assert!("/trace".parse::<MetricSpec>().is_err());
    }

    #[test]
    fn test_parse_single_result_line() {
        let metric = MetricSpec::new("startup", "warm");
        let output = "some noise\nRESULT startup: warm= 240.5 ms\nmore noise\n";

        let parsed = parse_metric_output(&metric, output).unwrap();
        assert_eq!(parsed.values, vec![240.5]);
        assert_eq!(parsed.metrics.get("startup/warm"), Some(&240.5));
    }

    #[test]
    fn test_parse_collects_sibling_traces() {
        let metric = MetricSpec::new("startup", "warm");
        let output = "RESULT startup: warm= 240.0 ms\n\
                      RESULT startup: cold= 500.0 ms\n\
                      RESULT memory: peak= 90.0 mb\n";

        let parsed = parse_metric_output(&metric, output).unwrap();
        assert_eq!(parsed.metrics.len(), 2);
        assert_eq!(parsed.metrics.get("startup/cold"), Some(&500.0));
        assert!(!parsed.metrics.contains_key("memory/peak"));
    }

    #[test]
    fn test_parse_bracketed_list_takes_mean() {
        let metric = MetricSpec::new("frame_times", "frame_times");
        let output = "RESULT frame_times: frame_times= [10.0,20.0,30.0] ms\n";

        let parsed = parse_metric_output(&metric, output).unwrap();
        assert_eq!(parsed.values, vec![20.0]);
        assert_eq!(parsed.metrics.get("frame_times/frame_times"), Some(&20.0));
    }

    #[test]
    fn test_parse_mean_stddev_pair() {
        let metric = MetricSpec::new("memory", "peak");
        let output = "RESULT memory: peak= {88.0, 4.5} mb\n";

        let parsed = parse_metric_output(&metric, output).unwrap();
        assert_eq!(parsed.values, vec![88.0]);
    }

    #[test]
    fn test_parse_page_timings_grouping() {
        let metric = MetricSpec::new("times", "t");
        let output = "Pages: [intl.example,www.example]\n\
                      RESULT times: t= [100.0,300.0] ms\n";

        let parsed = parse_metric_output(&metric, output).unwrap();
        // Page timings sum for the primary value
        assert_eq!(parsed.values, vec![400.0]);
        assert_eq!(parsed.metrics.get("times/t/intl.example"), Some(&100.0));
        assert_eq!(parsed.metrics.get("times/t/www.example"), Some(&300.0));
    }

    #[test]
    fn test_parse_page_timings_without_marker_sums() {
        let metric = MetricSpec::new("times", "t");
        let output = "RESULT times: t= [100.0,300.0] ms\n";

        let parsed = parse_metric_output(&metric, output).unwrap();
        assert_eq!(parsed.values, vec![400.0]);
        assert_eq!(parsed.metrics.get("times/t"), Some(&400.0));
    }

    #[test]
    fn test_parse_missing_metric_is_an_error() {
        let metric = MetricSpec::new("startup", "warm");
        let output = "no results here\n";

        match parse_metric_output(&metric, output) {
            Err(MetricParseError::MetricNotFound(key)) => assert_eq!(key, "startup/warm"),
            other => panic!("expected MetricNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_negative_values() {
        let metric = MetricSpec::new("memory", "delta");
        let output = "RESULT memory: delta= -12.5 mb\n";

        let parsed = parse_metric_output(&metric, output).unwrap();
        assert_eq!(parsed.values, vec![-12.5]);
    }

    #[test]
    fn test_truncated_mean_plain() {
        // No truncation degenerates to the mean
        assert_eq!(truncated_mean(&[1.0, 2.0, 3.0], 0.0), 2.0);
        // Two or fewer values are never truncated
        assert_eq!(truncated_mean(&[1.0, 100.0], 0.25), 50.5);
    }

    #[test]
    fn test_truncated_mean_discards_outliers() {
        // 25% of 8 = 2 discarded from each end
        let values = [0.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 1000.0];
        let result = truncated_mean(&values, 0.25);
        assert!((result - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_standard_deviation_and_error() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let sd = standard_deviation(&values);
        assert!((sd - 2.138).abs() < 0.01);

        let se = standard_error(&values);
        assert!((se - sd / 8f64.sqrt()).abs() < 1e-9);

        assert_eq!(standard_deviation(&[5.0]), 0.0);
    }

    #[test]
    fn test_confidence_score_separated_groups() {
        let good = vec![vec![1.0, 1.1, 0.9, 1.0, 1.05]];
        let bad = vec![vec![10.0, 10.2, 9.8, 10.1, 9.9]];

        let confidence = confidence_score(&good, &bad);
        assert!(confidence > 95.0, "confidence was {confidence}");
    }

    #[test]
    fn test_confidence_score_identical_groups() {
        let group = vec![vec![5.0, 5.0, 5.0]];
        assert_eq!(confidence_score(&group, &group), 0.0);
    }

    #[test]
    fn test_confidence_score_empty_groups() {
        assert_eq!(confidence_score(&[], &[vec![1.0]]), 0.0);
    }
}
