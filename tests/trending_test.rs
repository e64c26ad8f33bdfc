use loadctl::history::HistoryEntry;
use loadctl::model::{TransactionMetric, TrendingSnapshot};
use loadctl::trending::*;

fn thresholds() -> TrendThresholds {
    TrendThresholds {
        runs_count: 5,
        avg_improvement: 5,
        avg_minor_regression: 5,
        avg_major_regression: 10,
        pctl_improvement: 5,
        pctl_minor_regression: 5,
        pctl_major_regression: 10,
    }
}

fn metric(name: &str, script: &str, avg: f64, pctl: f64) -> TransactionMetric {
    TransactionMetric {
        name: name.to_string(),
        script: script.to_string(),
        min: avg / 2.0,
        max: avg * 2.0,
        avg,
        percentile_value: pctl,
        breakers: 0.0,
        sla_threshold: 0.0,
    }
}

fn snapshot(run_id: u32, transactions: Vec<TransactionMetric>) -> TrendingSnapshot {
    TrendingSnapshot {
        run_id,
        test_id: 7,
        test_name: "checkout flow".to_string(),
        status: "PASSED".to_string(),
        vusers: 50,
        duration: 600.0,
        percentile: 90,
        avg_throughput: 1000.0,
        total_throughput: 2000.0,
        avg_hits: 10.0,
        total_hits: 6000.0,
        total_tx_passed: 100,
        total_tx_failed: 0,
        errors_per_sec: 0.0,
        start_time: "0".to_string(),
        transactions,
        tenant_id: "t1".to_string(),
        benchmark_id: None,
        benchmark: None,
    }
}

fn entry(build_id: u32, snapshot: TrendingSnapshot) -> HistoryEntry {
    HistoryEntry {
        build_id,
        build_date: format!("2026.01.0{build_id} 12:00:00"),
        snapshot,
    }
}

/// History of runs [30, 20, 10], newest first, one shared transaction.
fn previous_mode_history() -> Vec<HistoryEntry> {
    vec![
        entry(3, snapshot(30, vec![metric("login", "main", 100.0, 200.0)])),
        entry(2, snapshot(20, vec![metric("login", "main", 50.0, 100.0)])),
        entry(1, snapshot(10, vec![metric("login", "main", 25.0, 50.0)])),
    ]
}

#[test]
fn test_empty_history_yields_no_report() {
    assert!(analyze(&[], &thresholds()).is_none());
}

#[test]
fn test_previous_mode_uses_nearest_older_run() {
    let report = analyze(&previous_mode_history(), &thresholds()).unwrap();
    assert_eq!(report.transactions.len(), 1);
    let group = &report.transactions[0];
    assert_eq!(group.transaction_name, "login");
    assert_eq!(group.script_name, "main");
    assert_eq!(group.points.len(), 3);

    // run 30 benchmarks against run 20
    let p30 = &group.points[0];
    assert_eq!(p30.run_id, 30);
    assert_eq!(p30.benchmark_run_id, 20);
    assert!(!p30.benchmark_fallback);
    assert_eq!(p30.avg, 100.0);
    assert_eq!(p30.benchmark_avg, 50.0);
    assert_eq!(p30.benchmark_percentile_value, 100.0);
    assert_eq!(p30.avg_trend, 100);
    assert_eq!(p30.pctl_trend, 100);

    // run 20 benchmarks against run 10
    let p20 = &group.points[1];
    assert_eq!(p20.benchmark_run_id, 10);
    assert_eq!(p20.avg_trend, 100);

    // run 10 has no older run: self-comparison, trend 0
    let p10 = &group.points[2];
    assert_eq!(p10.benchmark_run_id, 10);
    assert!(p10.benchmark_fallback);
    assert_eq!(p10.avg_trend, 0);
    assert_eq!(p10.pctl_trend, 0);
}

#[test]
fn test_previous_mode_skips_runs_missing_the_transaction() {
    // run 20 never executed "login", so run 30 must reach back to run 10
    let history = vec![
        entry(3, snapshot(30, vec![metric("login", "main", 100.0, 200.0)])),
        entry(2, snapshot(20, vec![metric("search", "main", 1.0, 2.0)])),
        entry(1, snapshot(10, vec![metric("login", "main", 25.0, 50.0)])),
    ];
    let report = analyze(&history, &thresholds()).unwrap();
    let login = report
        .transactions
        .iter()
        .find(|g| g.transaction_name == "login")
        .unwrap();
    assert_eq!(login.points[0].benchmark_run_id, 10);
    assert_eq!(login.points[0].avg_trend, 300);
}

#[test]
fn test_explicit_benchmark_applies_to_every_run() {
    let mut history = previous_mode_history();
    history[0].snapshot.benchmark_id = Some(10);
    history[0].snapshot.benchmark = Some(Box::new(snapshot(
        10,
        vec![metric("login", "main", 25.0, 50.0)],
    )));

    let report = analyze(&history, &thresholds()).unwrap();
    assert_eq!(report.benchmark_id, Some(10));
    let group = &report.transactions[0];

    // every run compares against run 10's metric (25ms avg)
    assert_eq!(group.points[0].benchmark_run_id, 10);
    assert_eq!(group.points[0].avg_trend, 300); // (100-25)/25
    assert_eq!(group.points[1].benchmark_run_id, 10);
    assert_eq!(group.points[1].avg_trend, 100); // (50-25)/25
    assert_eq!(group.points[2].avg_trend, 0);
}

#[test]
fn test_explicit_benchmark_missing_key_falls_back_to_self() {
    let mut history = previous_mode_history();
    history[0].snapshot.benchmark_id = Some(99);
    // the benchmark run never executed "login"
    history[0].snapshot.benchmark = Some(Box::new(snapshot(
        99,
        vec![metric("other", "main", 1.0, 1.0)],
    )));

    let report = analyze(&history, &thresholds()).unwrap();
    let group = &report.transactions[0];
    for point in &group.points {
        assert!(point.benchmark_fallback);
        assert_eq!(point.benchmark_run_id, point.run_id);
        assert_eq!(point.avg_trend, 0);
    }
}

#[test]
fn test_no_declared_benchmark_means_self_for_anchor() {
    // single run, no benchmark: the run is its own benchmark, trend 0
    let history = vec![entry(1, snapshot(10, vec![metric("login", "main", 25.0, 50.0)]))];
    let report = analyze(&history, &thresholds()).unwrap();
    let point = &report.transactions[0].points[0];
    assert_eq!(point.avg_trend, 0);
    assert!(point.benchmark_fallback);
}

#[test]
fn test_zero_benchmark_value_coerces_trend_to_zero() {
    let history = vec![
        entry(2, snapshot(20, vec![metric("login", "main", 100.0, 200.0)])),
        entry(1, snapshot(10, vec![metric("login", "main", 0.0, 0.0)])),
    ];
    let report = analyze(&history, &thresholds()).unwrap();
    let p20 = &report.transactions[0].points[0];
    assert_eq!(p20.benchmark_run_id, 10);
    assert_eq!(p20.avg_trend, 0, "division by zero must coerce, not explode");
    assert!(!p20.avg_major_regression);
}

#[test]
fn test_classification_flags_in_report() {
    // avg regresses by 100% (major); percentile improves by 50%
    let history = vec![
        entry(2, snapshot(20, vec![metric("login", "main", 100.0, 50.0)])),
        entry(1, snapshot(10, vec![metric("login", "main", 50.0, 100.0)])),
    ];
    let report = analyze(&history, &thresholds()).unwrap();
    let p20 = &report.transactions[0].points[0];

    assert_eq!(p20.avg_trend, 100);
    assert!(p20.avg_major_regression);
    assert!(!p20.avg_minor_regression);
    assert!(!p20.avg_improved);

    assert_eq!(p20.pctl_trend, -50);
    assert!(p20.pctl_improved);
    assert!(!p20.pctl_minor_regression);
    assert!(!p20.pctl_major_regression);
}

#[test]
fn test_latency_values_rounded_to_three_decimals() {
    let history = vec![entry(
        1,
        snapshot(10, vec![metric("login", "main", 0.123456, 1.999999)]),
    )];
    let report = analyze(&history, &thresholds()).unwrap();
    let point = &report.transactions[0].points[0];
    assert_eq!(point.avg, 0.123);
    assert_eq!(point.percentile_value, 2.0);
}

#[test]
fn test_overview_rows_one_per_run() {
    let report = analyze(&previous_mode_history(), &thresholds()).unwrap();
    assert_eq!(report.overview.len(), 3);
    assert_eq!(report.overview[0].run_id, 30);
    assert_eq!(report.overview[0].build_id, 3);
    // 100 transactions over 600s
    assert!((report.overview[0].tps - 100.0 / 600.0).abs() < 1e-9);
    assert_eq!(report.test_id, 7);
    assert_eq!(report.test_name, "checkout flow");
}

#[test]
fn test_overview_zero_duration_never_emits_non_finite() {
    let mut history = previous_mode_history();
    history[0].snapshot.duration = 0.0;
    history[0].snapshot.errors_per_sec = f64::INFINITY;
    let report = analyze(&history, &thresholds()).unwrap();
    let row = &report.overview[0];
    assert_eq!(row.tps, 0.0);
    assert_eq!(row.errors_per_sec, 0.0);
    assert_eq!(row.duration, 0.0);
}

#[test]
fn test_report_serializes_to_json() {
    let report = analyze(&previous_mode_history(), &thresholds()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["testId"], 7);
    assert!(json["overview"].as_array().unwrap().len() == 3);
    assert_eq!(json["transactions"][0]["transactionName"], "login");
    assert_eq!(json["thresholds"]["avgMajorRegression"], 10);
}

#[test]
fn test_cache_key_changes_with_inputs() {
    let a = cache_key(30, &thresholds());
    let b = cache_key(31, &thresholds());
    let mut other = thresholds();
    other.avg_major_regression = 20;
    let c = cache_key(30, &other);

    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, cache_key(30, &thresholds()));
}

#[test]
fn test_analyze_is_deterministic() {
    let history = previous_mode_history();
    let one = serde_json::to_string(&analyze(&history, &thresholds()).unwrap()).unwrap();
    let two = serde_json::to_string(&analyze(&history, &thresholds()).unwrap()).unwrap();
    assert_eq!(one, two);
}
