use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::status::RunStatus;

/// Immutable identity of a load test, resolved from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTest {
    pub id: u32,
    pub project_id: u32,
    pub name: String,
}

/// One execution of a load test. Mutated in place on every status poll;
/// owned by the orchestrator until `run()` returns it to the caller.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub id: u32,
    pub test: LoadTest,
    /// Raw status string as the API reported it.
    pub status: String,
    /// Normalized status name; always re-derived from `state`.
    pub detailed_status: String,
    pub state: RunStatus,
    /// Set by the backend once async teardown finishes. Lags the terminal
    /// status, so "ended" and "completely ended" are distinct.
    pub is_terminated: bool,
    pub has_report: bool,
    /// Epoch millis; -1 = unknown.
    pub start_time: i64,
    pub end_time: i64,
    /// Artifact name -> bytes. BTreeMap so files are written in a stable order.
    pub reports: BTreeMap<String, Vec<u8>>,
}

impl TestRun {
    pub fn new(id: u32, test: LoadTest) -> Self {
        TestRun {
            id,
            test,
            status: "NA".to_string(),
            detailed_status: "NA".to_string(),
            state: RunStatus::Unknown,
            is_terminated: false,
            has_report: false,
            start_time: -1,
            end_time: -1,
            reports: BTreeMap::new(),
        }
    }

    pub fn set_state(&mut self, state: RunStatus) {
        self.state = state;
        self.detailed_status = state.name().to_string();
    }

    /// Fold a status poll into the run. Absent fields keep their previous
    /// values; an unrecognized detailed status normalizes to `Unknown`.
    pub fn apply(&mut self, body: &RunStatusBody) {
        self.status = body.status.clone().unwrap_or_else(|| "NA".to_string());
        let detailed = body
            .ui_status
            .clone()
            .or_else(|| body.detailed_status.clone())
            .unwrap_or_else(|| "NA".to_string());

        if let Some(terminated) = body.is_terminated {
            self.is_terminated = terminated;
        }
        if let Some(has_report) = body.has_report {
            self.has_report = has_report;
        }
        if let Some(start) = body.start_time {
            self.start_time = start;
        }
        if let Some(end) = body.end_time {
            self.end_time = end;
        }

        self.set_state(RunStatus::parse(&detailed));
    }

    /// Terminal status alone is not enough: the backend flips the
    /// termination flag only after its own housekeeping completes.
    pub fn completely_ended(&self) -> bool {
        self.state.is_ended() && self.is_terminated
    }
}

/// Status endpoint body. Every field is optional; epochs arrive as either
/// JSON numbers or strings depending on the endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunStatusBody {
    pub status: Option<String>,
    pub ui_status: Option<String>,
    pub detailed_status: Option<String>,
    pub is_terminated: Option<bool>,
    pub has_report: Option<bool>,
    pub test_id: Option<u32>,
    #[serde(deserialize_with = "de_opt_epoch")]
    pub start_time: Option<i64>,
    #[serde(deserialize_with = "de_opt_epoch")]
    pub end_time: Option<i64>,
}

fn de_opt_epoch<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Epoch {
        Num(i64),
        Str(String),
        Other(serde_json::Value),
    }

    Ok(match Option::<Epoch>::deserialize(deserializer)? {
        Some(Epoch::Num(n)) => Some(n),
        Some(Epoch::Str(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Aggregate results for a finished run, as served by the results endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunResults {
    pub status: String,
    /// "HH:MM:SS"
    pub duration: String,
    pub percentile_value: u32,
    pub total_vusers: i64,
    /// "<number> <unit>/s"
    pub average_throughput: String,
    pub total_throughput: String,
    /// "<number> hits/s"
    pub average_hits: String,
    pub total_hits: i64,
    pub total_transactions_passed: i64,
    pub total_transactions_failed: i64,
    pub script_errors: i64,
}

impl RunResults {
    pub fn duration_secs(&self) -> i64 {
        let parts: Vec<&str> = self.duration.split(':').collect();
        if parts.len() != 3 {
            return 0;
        }
        let (Ok(h), Ok(m), Ok(s)) = (
            parts[0].parse::<i64>(),
            parts[1].parse::<i64>(),
            parts[2].parse::<i64>(),
        ) else {
            return 0;
        };
        h * 3600 + m * 60 + s
    }

    /// Raw division; a zero duration produces a non-finite value which
    /// consumers coerce to 0 at emission time.
    pub fn errors_per_sec(&self) -> f64 {
        self.script_errors as f64 / self.duration_secs() as f64
    }

    pub fn avg_hits_value(&self) -> f64 {
        self.average_hits
            .trim_end_matches(" hits/s")
            .parse()
            .unwrap_or(0.0)
    }

    pub fn avg_throughput_value(&self) -> f64 {
        strip_throughput_unit(&self.average_throughput)
    }

    pub fn total_throughput_value(&self) -> f64 {
        strip_throughput_unit(&self.total_throughput)
    }
}

/// Remove a `"<number> <unit>/s"` throughput unit, scaling by 1024^i for
/// the byte-multiple units. A malformed string yields the sentinel -1.0.
pub fn strip_throughput_unit(with_unit: &str) -> f64 {
    let parts: Vec<&str> = with_unit.split(' ').collect();
    if parts.len() != 2 {
        return -1.0;
    }
    let Ok(num) = parts[0].parse::<f64>() else {
        return -1.0;
    };
    let unit = parts[1].strip_suffix("/s").unwrap_or(parts[1]);

    const UNITS: [&str; 9] = ["bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    match UNITS.iter().position(|u| *u == unit) {
        Some(i) => num * 1024f64.powi(i as i32),
        None => num,
    }
}

/// One row of the per-transaction results endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionRow {
    pub name: String,
    pub load_test_script_id: i64,
    pub script_name: String,
    #[serde(rename = "minTRT")]
    pub min_trt: f64,
    #[serde(rename = "maxTRT")]
    pub max_trt: f64,
    #[serde(rename = "avgTRT")]
    pub avg_trt: f64,
    #[serde(rename = "percentileTRT")]
    pub percentile_trt: f64,
    pub breakers: f64,
    pub sla_status: String,
    pub sla_threshold: f64,
    pub std_deviation: f64,
    pub passed: i64,
    pub failed: i64,
    pub sla_trend: f64,
}

/// Point-in-time latency summary of one transaction, persisted in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetric {
    pub name: String,
    pub script: String,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub percentile_value: f64,
    pub breakers: f64,
    pub sla_threshold: f64,
}

impl From<&TransactionRow> for TransactionMetric {
    fn from(row: &TransactionRow) -> Self {
        TransactionMetric {
            name: row.name.clone(),
            script: row.script_name.clone(),
            min: row.min_trt,
            max: row.max_trt,
            avg: row.avg_trt,
            percentile_value: row.percentile_trt,
            breakers: row.breakers,
            sla_threshold: row.sla_threshold,
        }
    }
}

/// Immutable summary record of one completed run. Produced once per run;
/// the CI host persists the history and hands it back for trend analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingSnapshot {
    pub run_id: u32,
    pub test_id: u32,
    pub test_name: String,
    pub status: String,
    pub vusers: i64,
    /// Seconds.
    pub duration: f64,
    /// Latency percentile basis, e.g. 90.
    pub percentile: u32,
    pub avg_throughput: f64,
    pub total_throughput: f64,
    pub avg_hits: f64,
    pub total_hits: f64,
    pub total_tx_passed: i64,
    pub total_tx_failed: i64,
    pub errors_per_sec: f64,
    pub start_time: String,
    pub transactions: Vec<TransactionMetric>,
    pub tenant_id: String,
    /// Configured benchmark run id. None means "compare to previous".
    pub benchmark_id: Option<u32>,
    /// Resolved benchmark snapshot, when a benchmark run id was configured.
    pub benchmark: Option<Box<TrendingSnapshot>>,
}

impl TrendingSnapshot {
    /// Fallback record when the results endpoints are unavailable: enough
    /// identity for the history to stay contiguous, no metrics.
    pub fn minimal(
        run_id: u32,
        test_id: u32,
        status: &str,
        tenant_id: &str,
        benchmark_id: Option<u32>,
    ) -> Self {
        TrendingSnapshot {
            run_id,
            test_id,
            test_name: String::new(),
            status: status.to_string(),
            vusers: 0,
            duration: 0.0,
            percentile: 0,
            avg_throughput: 0.0,
            total_throughput: 0.0,
            avg_hits: 0.0,
            total_hits: 0.0,
            total_tx_passed: 0,
            total_tx_failed: 0,
            errors_per_sec: 0.0,
            start_time: "-1".to_string(),
            transactions: Vec::new(),
            tenant_id: tenant_id.to_string(),
            benchmark_id,
            benchmark: None,
        }
    }

    pub fn from_run(
        test_run: &TestRun,
        results: &RunResults,
        transactions: &[TransactionRow],
        tenant_id: &str,
        benchmark: Option<TrendingSnapshot>,
    ) -> Self {
        TrendingSnapshot {
            run_id: test_run.id,
            test_id: test_run.test.id,
            test_name: test_run.test.name.clone(),
            status: results.status.clone(),
            vusers: results.total_vusers,
            duration: results.duration_secs() as f64,
            percentile: results.percentile_value,
            avg_throughput: results.avg_throughput_value(),
            total_throughput: results.total_throughput_value(),
            avg_hits: results.avg_hits_value(),
            total_hits: results.total_hits as f64,
            total_tx_passed: results.total_transactions_passed,
            total_tx_failed: results.total_transactions_failed,
            errors_per_sec: results.errors_per_sec(),
            start_time: test_run.start_time.to_string(),
            transactions: transactions.iter().map(TransactionMetric::from).collect(),
            tenant_id: tenant_id.to_string(),
            benchmark_id: None,
            benchmark: benchmark.map(Box::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test() -> LoadTest {
        LoadTest {
            id: 7,
            project_id: 1,
            name: "checkout flow".to_string(),
        }
    }

    #[test]
    fn test_new_run_defaults() {
        let run = TestRun::new(100, make_test());
        assert_eq!(run.status, "NA");
        assert_eq!(run.detailed_status, "NA");
        assert_eq!(run.state, RunStatus::Unknown);
        assert!(!run.is_terminated);
        assert!(!run.has_report);
        assert_eq!(run.start_time, -1);
        assert_eq!(run.end_time, -1);
        assert!(run.reports.is_empty());
    }

    #[test]
    fn test_apply_normalizes_detailed_status() {
        let mut run = TestRun::new(100, make_test());
        let body: RunStatusBody =
            serde_json::from_str(r#"{"status": "in progress", "uiStatus": "RUNNING"}"#).unwrap();
        run.apply(&body);
        assert_eq!(run.status, "in progress");
        assert_eq!(run.state, RunStatus::Running);
        assert_eq!(run.detailed_status, "RUNNING");
    }

    #[test]
    fn test_apply_unrecognized_status_maps_to_unknown() {
        let mut run = TestRun::new(100, make_test());
        let body: RunStatusBody =
            serde_json::from_str(r#"{"uiStatus": "SOME_NEW_STATE"}"#).unwrap();
        run.apply(&body);
        assert_eq!(run.state, RunStatus::Unknown);
        // detailed status is always re-derived from the normalized state
        assert_eq!(run.detailed_status, "NA");
    }

    #[test]
    fn test_apply_falls_back_to_detailed_status_field() {
        let mut run = TestRun::new(100, make_test());
        let body: RunStatusBody =
            serde_json::from_str(r#"{"detailedStatus": "PASSED"}"#).unwrap();
        run.apply(&body);
        assert_eq!(run.state, RunStatus::Passed);
    }

    #[test]
    fn test_apply_keeps_flags_when_absent() {
        let mut run = TestRun::new(100, make_test());
        run.is_terminated = true;
        run.has_report = true;
        run.apply(&RunStatusBody::default());
        assert!(run.is_terminated);
        assert!(run.has_report);
    }

    #[test]
    fn test_epoch_accepts_number_or_string() {
        let body: RunStatusBody =
            serde_json::from_str(r#"{"startTime": "1650000000000", "endTime": 1650000360000}"#)
                .unwrap();
        assert_eq!(body.start_time, Some(1_650_000_000_000));
        assert_eq!(body.end_time, Some(1_650_000_360_000));
    }

    #[test]
    fn test_epoch_wrong_type_defaults_to_none() {
        let body: RunStatusBody =
            serde_json::from_str(r#"{"startTime": {"weird": true}}"#).unwrap();
        assert_eq!(body.start_time, None);
    }

    #[test]
    fn test_completely_ended_requires_both() {
        let mut run = TestRun::new(100, make_test());
        run.set_state(RunStatus::Passed);
        assert!(!run.completely_ended(), "terminal status alone is not enough");
        run.is_terminated = true;
        assert!(run.completely_ended());

        let mut run = TestRun::new(101, make_test());
        run.is_terminated = true;
        assert!(
            !run.completely_ended(),
            "termination flag alone is not enough"
        );
    }

    #[test]
    fn test_strip_throughput_unit_kb() {
        assert_eq!(strip_throughput_unit("123456789 KB/s"), 123_456_789.0 * 1024.0);
    }

    #[test]
    fn test_strip_throughput_unit_bytes() {
        assert_eq!(strip_throughput_unit("123456789 bytes/s"), 123_456_789.0);
    }

    #[test]
    fn test_strip_throughput_unit_mb() {
        assert_eq!(strip_throughput_unit("2.5 MB/s"), 2.5 * 1024.0 * 1024.0);
    }

    #[test]
    fn test_strip_throughput_unit_malformed_is_sentinel() {
        assert_eq!(strip_throughput_unit("123456789"), -1.0);
        assert_eq!(strip_throughput_unit("1 2 3"), -1.0);
        assert_eq!(strip_throughput_unit("abc KB/s"), -1.0);
        assert_eq!(strip_throughput_unit(""), -1.0);
    }

    #[test]
    fn test_duration_secs() {
        let results = RunResults {
            duration: "01:02:03".to_string(),
            ..RunResults::default()
        };
        assert_eq!(results.duration_secs(), 3723);
    }

    #[test]
    fn test_duration_secs_malformed_is_zero() {
        let results = RunResults {
            duration: "90 minutes".to_string(),
            ..RunResults::default()
        };
        assert_eq!(results.duration_secs(), 0);
    }

    #[test]
    fn test_avg_hits_value() {
        let results = RunResults {
            average_hits: "12.5 hits/s".to_string(),
            ..RunResults::default()
        };
        assert_eq!(results.avg_hits_value(), 12.5);
    }

    #[test]
    fn test_transaction_row_deserializes_trt_fields() {
        let row: TransactionRow = serde_json::from_str(
            r#"{
                "name": "login",
                "scriptName": "main.jmx",
                "minTRT": 0.1,
                "maxTRT": 2.0,
                "avgTRT": 0.5,
                "percentileTRT": 1.5,
                "breakers": 0.0,
                "slaThreshold": 3.0,
                "passed": 10,
                "failed": 1
            }"#,
        )
        .unwrap();
        assert_eq!(row.name, "login");
        assert_eq!(row.avg_trt, 0.5);
        assert_eq!(row.percentile_trt, 1.5);
        let metric = TransactionMetric::from(&row);
        assert_eq!(metric.script, "main.jmx");
        assert_eq!(metric.sla_threshold, 3.0);
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let snapshot = TrendingSnapshot {
            run_id: 30,
            test_id: 7,
            test_name: "checkout flow".to_string(),
            status: "PASSED".to_string(),
            vusers: 50,
            duration: 600.0,
            percentile: 90,
            avg_throughput: 1024.0,
            total_throughput: 2048.0,
            avg_hits: 10.0,
            total_hits: 6000.0,
            total_tx_passed: 100,
            total_tx_failed: 2,
            errors_per_sec: 0.01,
            start_time: "1650000000000".to_string(),
            transactions: vec![TransactionMetric {
                name: "login".to_string(),
                script: "main.jmx".to_string(),
                min: 0.1,
                max: 2.0,
                avg: 0.5,
                percentile_value: 1.5,
                breakers: 0.0,
                sla_threshold: 3.0,
            }],
            tenant_id: "tenant-1".to_string(),
            benchmark_id: Some(10),
            benchmark: None,
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: TrendingSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, 30);
        assert_eq!(back.benchmark_id, Some(10));
        assert_eq!(back.transactions, snapshot.transactions);
    }
}
