//! Trending/regression analysis over a history of run snapshots.
//!
//! Pure functions over caller-supplied data: no I/O, no shared state, safe
//! to invoke concurrently. Recomputing for the same inputs always yields
//! the same report, so callers may cache the output keyed on
//! (latest run id, thresholds) and invalidate however they like.

use serde::{Deserialize, Serialize};

use crate::history::HistoryEntry;
use crate::model::{TransactionMetric, TrendingSnapshot};

/// Classification thresholds, in percent. Improvement thresholds are
/// magnitudes (an improvement is a trend below the negated value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendThresholds {
    /// How many historical runs feed the report.
    pub runs_count: u32,
    pub avg_improvement: i32,
    pub avg_minor_regression: i32,
    pub avg_major_regression: i32,
    pub pctl_improvement: i32,
    pub pctl_minor_regression: i32,
    pub pctl_major_regression: i32,
}

/// One row of the per-run overview table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewRow {
    pub run_id: u32,
    pub build_id: u32,
    pub date: String,
    pub status: String,
    pub vusers: i64,
    pub avg_hits: f64,
    pub avg_throughput: f64,
    pub errors_per_sec: f64,
    pub duration: f64,
    /// (passed + failed transactions) / duration.
    pub tps: f64,
    pub total_tx_passed: i64,
    pub total_tx_failed: i64,
}

/// Per-run trend record for one transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub run_id: u32,
    pub build_id: u32,
    pub percentile: u32,
    /// Which run the metrics were compared against.
    pub benchmark_run_id: u32,
    /// True when no benchmark metric existed and the point was compared
    /// to itself (trend 0).
    pub benchmark_fallback: bool,
    pub avg: f64,
    pub percentile_value: f64,
    pub benchmark_avg: f64,
    pub benchmark_percentile_value: f64,
    pub avg_trend: i64,
    pub avg_improved: bool,
    pub avg_minor_regression: bool,
    pub avg_major_regression: bool,
    pub pctl_trend: i64,
    pub pctl_improved: bool,
    pub pctl_minor_regression: bool,
    pub pctl_major_regression: bool,
}

/// All trend records for one `(transaction, script)` pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendGroup {
    pub transaction_name: String,
    pub script_name: String,
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    pub test_id: u32,
    pub test_name: String,
    /// Explicitly configured benchmark run, if any.
    pub benchmark_id: Option<u32>,
    pub thresholds: TrendThresholds,
    pub overview: Vec<OverviewRow>,
    pub transactions: Vec<TrendGroup>,
}

/// Cache key for a rendered report: new latest run or changed thresholds
/// invalidate, nothing else does.
pub fn cache_key(latest_run_id: u32, thresholds: &TrendThresholds) -> String {
    format!(
        "{latest_run_id}:{}",
        serde_json::to_string(thresholds).unwrap_or_default()
    )
}

/// Signed percent change of `value` against `benchmark`. A zero benchmark
/// (or any other non-finite outcome) is coerced to 0, never NaN/Infinity.
pub fn trend(value: f64, benchmark: f64) -> f64 {
    sanitize((value - benchmark) / benchmark * 100.0)
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Classification {
    improved: bool,
    minor_regression: bool,
    major_regression: bool,
}

/// Boundaries are strict: a trend exactly at a threshold crosses nothing.
fn classify(trend: f64, improvement: i32, minor: i32, major: i32) -> Classification {
    Classification {
        improved: trend < -f64::from(improvement),
        minor_regression: trend < f64::from(major) && trend > f64::from(minor),
        major_regression: trend > f64::from(major),
    }
}

struct PointInput<'a> {
    build_id: u32,
    run_id: u32,
    percentile: u32,
    metric: &'a TransactionMetric,
}

/// Analyze a history of snapshots, most recent first. The caller has
/// already filtered to one (test, tenant) and bounded the depth; the
/// first entry anchors the report.
pub fn analyze(entries: &[HistoryEntry], thresholds: &TrendThresholds) -> Option<TrendReport> {
    let anchor = entries.first()?;

    // The latest run's declared benchmark, or the run itself (trend 0).
    let benchmark_explicit = anchor.snapshot.benchmark_id.is_some();
    let global_benchmark: &TrendingSnapshot = anchor
        .snapshot
        .benchmark
        .as_deref()
        .unwrap_or(&anchor.snapshot);

    let overview = entries.iter().map(overview_row).collect();

    // Group every transaction metric across the history by (name, script),
    // keeping first-seen order so the report is stable.
    let mut groups: Vec<((String, String), Vec<PointInput>)> = Vec::new();
    for entry in entries {
        for metric in &entry.snapshot.transactions {
            let key = (metric.name.clone(), metric.script.clone());
            let input = PointInput {
                build_id: entry.build_id,
                run_id: entry.snapshot.run_id,
                percentile: entry.snapshot.percentile,
                metric,
            };
            match groups.iter().position(|(k, _)| *k == key) {
                Some(idx) => groups[idx].1.push(input),
                None => groups.push((key, vec![input])),
            }
        }
    }

    let transactions = groups
        .into_iter()
        .map(|((name, script), points)| {
            let trend_points = points
                .iter()
                .map(|point| {
                    let (benchmark_metric, benchmark_run_id, fallback) = resolve_benchmark(
                        point,
                        &points,
                        global_benchmark,
                        benchmark_explicit,
                        (&name, &script),
                    );
                    build_point(point, benchmark_metric, benchmark_run_id, fallback, thresholds)
                })
                .collect();
            TrendGroup {
                transaction_name: name,
                script_name: script,
                points: trend_points,
            }
        })
        .collect();

    Some(TrendReport {
        test_id: anchor.snapshot.test_id,
        test_name: anchor.snapshot.test_name.clone(),
        benchmark_id: anchor.snapshot.benchmark_id,
        thresholds: thresholds.clone(),
        overview,
        transactions,
    })
}

fn overview_row(entry: &HistoryEntry) -> OverviewRow {
    let snapshot = &entry.snapshot;
    let tps = (snapshot.total_tx_passed + snapshot.total_tx_failed) as f64 / snapshot.duration;
    OverviewRow {
        run_id: snapshot.run_id,
        build_id: entry.build_id,
        date: entry.build_date.clone(),
        status: snapshot.status.clone(),
        vusers: snapshot.vusers,
        avg_hits: sanitize(snapshot.avg_hits),
        avg_throughput: sanitize(snapshot.avg_throughput),
        errors_per_sec: sanitize(snapshot.errors_per_sec),
        duration: sanitize(snapshot.duration),
        tps: sanitize(tps),
        total_tx_passed: snapshot.total_tx_passed,
        total_tx_failed: snapshot.total_tx_failed,
    }
}

/// Pick the benchmark metric for one point.
///
/// Explicit mode compares every run against the configured benchmark
/// snapshot. "Previous" mode compares each run against the nearest older
/// run (largest run id strictly below it) that has the same transaction.
/// Either way, a missing benchmark metric degrades to self-comparison.
fn resolve_benchmark<'a>(
    point: &PointInput<'a>,
    group: &[PointInput<'a>],
    global_benchmark: &'a TrendingSnapshot,
    explicit: bool,
    key: (&str, &str),
) -> (&'a TransactionMetric, u32, bool) {
    if explicit {
        match global_benchmark
            .transactions
            .iter()
            .find(|t| t.name == key.0 && t.script == key.1)
        {
            Some(metric) => (metric, global_benchmark.run_id, false),
            None => (point.metric, point.run_id, true),
        }
    } else {
        let previous = group
            .iter()
            .filter(|p| p.run_id < point.run_id)
            .max_by_key(|p| p.run_id);
        match previous {
            Some(prev) => (prev.metric, prev.run_id, false),
            None => (point.metric, point.run_id, true),
        }
    }
}

fn build_point(
    point: &PointInput<'_>,
    benchmark: &TransactionMetric,
    benchmark_run_id: u32,
    fallback: bool,
    thresholds: &TrendThresholds,
) -> TrendPoint {
    let avg_trend = trend(point.metric.avg, benchmark.avg);
    let pctl_trend = trend(point.metric.percentile_value, benchmark.percentile_value);

    let avg_class = classify(
        avg_trend,
        thresholds.avg_improvement,
        thresholds.avg_minor_regression,
        thresholds.avg_major_regression,
    );
    let pctl_class = classify(
        pctl_trend,
        thresholds.pctl_improvement,
        thresholds.pctl_minor_regression,
        thresholds.pctl_major_regression,
    );

    TrendPoint {
        run_id: point.run_id,
        build_id: point.build_id,
        percentile: point.percentile,
        benchmark_run_id,
        benchmark_fallback: fallback,
        avg: round3(sanitize(point.metric.avg)),
        percentile_value: round3(sanitize(point.metric.percentile_value)),
        benchmark_avg: round3(sanitize(benchmark.avg)),
        benchmark_percentile_value: round3(sanitize(benchmark.percentile_value)),
        avg_trend: avg_trend.round() as i64,
        avg_improved: avg_class.improved,
        avg_minor_regression: avg_class.minor_regression,
        avg_major_regression: avg_class.major_regression,
        pctl_trend: pctl_trend.round() as i64,
        pctl_improved: pctl_class.improved,
        pctl_minor_regression: pctl_class.minor_regression,
        pctl_major_regression: pctl_class.major_regression,
    }
}
