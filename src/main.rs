mod api;
mod artifacts;
mod catalog;
mod client;
mod config;
mod error;
mod history;
mod model;
mod reports;
mod runner;
mod runs;
mod status;
mod trending;

use clap::Parser;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use client::ApiClient;
use config::{CliArgs, ServerConfig, TestRunOptions, SEPARATOR_LINE};
use history::HistoryEntry;
use model::TrendingSnapshot;
use runner::Orchestrator;
use trending::TrendThresholds;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Keep the appender guard alive for the whole process.
    let _log_guard = init_tracing(&args);

    print_banner(&args);

    if !args.output_dir.exists() {
        std::fs::create_dir_all(&args.output_dir)?;
    }

    let config = ServerConfig::from_args(&args);
    let options = TestRunOptions::from_args(&args);

    let client = match ApiClient::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to {}: {e}", args.url);
            std::process::exit(1);
        }
    };

    // Ctrl+C flips the cancellation flag; the orchestrator observes it at
    // the top of each poll iteration and runs the interrupt policy.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received cancellation signal");
            let _ = cancel_tx.send(true);
        }
    });

    let orchestrator = Orchestrator::new(client, options, cancel_rx);

    let test_run = match orchestrator.run().await {
        Ok(test_run) => test_run,
        Err(e) => {
            error!("Test run failed: {e}");
            std::process::exit(1);
        }
    };

    info!("Run id: {}", test_run.id);

    for (file_name, content) in &test_run.reports {
        let path = args.output_dir.join(file_name);
        match std::fs::write(&path, content) {
            Ok(()) => info!("Report file {} created.", path.display()),
            Err(e) => error!("Failed to create report file {}: {e}", path.display()),
        }
    }

    if test_run.has_report {
        write_run_result(&args, &test_run);
    }

    update_trending(&args, &orchestrator, &test_run).await;

    if test_run.state.is_success() {
        Ok(())
    } else {
        error!(
            "Test run #{} finished with {} status.",
            test_run.id, test_run.state
        );
        std::process::exit(1);
    }
}

fn init_tracing(args: &CliArgs) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = if args.debug {
        "loadctl=debug"
    } else {
        "loadctl=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let console_layer = tracing_subscriber::fmt::layer().with_target(false);

    let log_file = args.log_file.as_ref().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("cannot open log file {}: {e}", path.display()))
            .ok()
    });

    match log_file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .init();
            None
        }
    }
}

fn print_banner(args: &CliArgs) {
    info!("{SEPARATOR_LINE}");
    info!("loadctl v{}", env!("CARGO_PKG_VERSION"));
    info!("Job started with parameters:");
    info!("  url: {}", args.url);
    info!("  username: {}", args.username);
    info!("  tenant: {}", args.tenant_id);
    info!("  project: {}", args.project_id);
    info!("  test: {}", args.test_id);
    info!("  send email: {}", args.send_email);
    info!("  skip pdf report: {}", args.skip_pdf_report);
    info!("{SEPARATOR_LINE}");
}

fn write_run_result(args: &CliArgs, test_run: &model::TestRun) {
    let result = json!({
        "testOptions": {
            "testId": args.test_id,
            "sendEmail": args.send_email,
            "skipPdfReport": args.skip_pdf_report,
        },
        "testRun": {
            "id": test_run.id,
            "testId": test_run.test.id,
            "testName": test_run.test.name,
            "status": test_run.status,
            "detailedStatus": test_run.detailed_status,
            "hasReport": test_run.has_report,
            "startTime": test_run.start_time,
            "endTime": test_run.end_time,
        },
    });
    let path = args
        .output_dir
        .join(format!("loadctl_run_result_{}.json", args.build_id));
    match std::fs::write(&path, result.to_string()) {
        Ok(()) => info!("Run result file {} created.", path.display()),
        Err(e) => error!("Failed to write run result file: {e}"),
    }
}

/// Append this run's snapshot to the history and regenerate the trend
/// report data. Trending problems never fail the build.
async fn update_trending(args: &CliArgs, orchestrator: &Orchestrator, test_run: &model::TestRun) {
    let history_path = args
        .history_file
        .clone()
        .unwrap_or_else(|| args.output_dir.join("loadctl_history.json"));

    let snapshot = match orchestrator.fetch_trending(test_run, args.benchmark).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Failed to fetch trending data for run #{}: {e}", test_run.id);
            TrendingSnapshot::minimal(
                test_run.id,
                test_run.test.id,
                &test_run.detailed_status,
                &orchestrator.client().config().tenant_id,
                args.benchmark,
            )
        }
    };

    let entry = HistoryEntry {
        build_id: args.build_id,
        build_date: chrono::Local::now().format("%Y.%m.%d %H:%M:%S").to_string(),
        snapshot,
    };
    if let Err(e) = history::append_entry(&history_path, entry) {
        warn!("Failed to update history file {}: {e}", history_path.display());
        return;
    }

    let thresholds = TrendThresholds {
        runs_count: args.runs_count.max(1),
        avg_improvement: args.avg_improvement,
        avg_minor_regression: args.avg_minor_regression,
        avg_major_regression: args.avg_major_regression,
        pctl_improvement: args.pctl_improvement,
        pctl_minor_regression: args.pctl_minor_regression,
        pctl_major_regression: args.pctl_major_regression,
    };

    let entries =
        history::select_for_analysis(history::load_history(&history_path), thresholds.runs_count);
    let Some(report) = trending::analyze(&entries, &thresholds) else {
        warn!("No history entries to analyze, skipping trending report");
        return;
    };

    let report_path = args
        .output_dir
        .join(format!("loadctl_trending_{}.json", report.test_id));
    match serde_json::to_string_pretty(&report) {
        Ok(json) => match std::fs::write(&report_path, json) {
            Ok(()) => info!("Trending report {} created.", report_path.display()),
            Err(e) => warn!("Failed to write trending report: {e}"),
        },
        Err(e) => warn!("Failed to serialize trending report: {e}"),
    }
}
