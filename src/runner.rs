use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::catalog::TestCatalog;
use crate::client::ApiClient;
use crate::config::{
    TestRunOptions, STOP_RUN_MAX_RETRY, STOP_RUN_POLL_INTERVAL_SECS, TEST_RUN_LOGIN_MAX_RETRY,
    TEST_RUN_MAX_RETRY, TEST_RUN_POLL_INTERVAL_SECS,
};
use crate::error::Result;
use crate::model::TestRun;
use crate::reports::ReportService;
use crate::runs::RunStatusService;
use crate::status::RunStatus;

/// Why the polling loop returned.
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    /// The run is completely ended (terminal status + termination flag).
    Ended,
    /// The cancellation flag was observed.
    Cancelled,
}

/// What to do after a failed poll.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Relogin,
    Fatal,
}

/// Failure bookkeeping for the polling loop. Both budgets reset on any
/// successful poll, so failures are only fatal when consecutive.
#[derive(Debug, Default)]
pub struct RetryCounters {
    pub retries: u32,
    pub login_retries: u32,
}

impl RetryCounters {
    pub fn record_success(&mut self) {
        self.retries = 0;
        self.login_retries = 0;
    }

    pub fn record_failure(
        &mut self,
        is_auth: bool,
        max_retry: u32,
        max_login_retry: u32,
    ) -> RetryDecision {
        if is_auth {
            if self.login_retries < max_login_retry {
                self.login_retries += 1;
                RetryDecision::Relogin
            } else {
                RetryDecision::Fatal
            }
        } else {
            self.retries += 1;
            if self.retries >= max_retry {
                RetryDecision::Fatal
            } else {
                RetryDecision::Retry
            }
        }
    }
}

/// Status-line printer that suppresses repeats: long runs poll the same
/// state for hours and the log should not say so every 10 seconds.
#[derive(Debug, Default)]
pub struct StatusLinePrinter {
    last: Option<String>,
}

impl StatusLinePrinter {
    /// Returns true when a line was actually emitted.
    pub fn print(&mut self, test_run: &TestRun) -> bool {
        let line = format!("{} - {}", test_run.state, test_run.status);
        if self.last.as_deref() == Some(&line) {
            return false;
        }
        info!("{line}");
        self.last = Some(line);
        true
    }
}

/// Drives one run end to end: start, poll until completely ended, fetch
/// the final artifacts. Strictly sequential; cancellation is observed at
/// the top of each poll iteration and never preempts an in-flight call.
pub struct Orchestrator {
    client: ApiClient,
    options: TestRunOptions,
    cancel_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(client: ApiClient, options: TestRunOptions, cancel_rx: watch::Receiver<bool>) -> Self {
        Orchestrator {
            client,
            options,
            cancel_rx,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Resolve the test and request a new run. Returns the run id.
    pub async fn start(&self, test_id: u32, send_email: bool) -> Result<u32> {
        let catalog = TestCatalog::new(&self.client);
        let test = catalog.fetch(test_id).await?;
        catalog.start_run(test.id, send_email).await
    }

    /// The primary entry point: start, poll, download. On cancellation the
    /// interrupt policy decides how much of that still happens; the run is
    /// returned either way so the caller can write whatever artifacts exist.
    pub async fn run(&self) -> Result<TestRun> {
        info!("Fetching load test #{} ...", self.options.test_id);
        let catalog = TestCatalog::new(&self.client);
        let test = catalog.fetch(self.options.test_id).await?;

        info!("Starting load test \"{}\" ...", test.name);
        let run_id = catalog.start_run(test.id, self.options.send_email).await?;
        info!("Test run #{run_id} started.");

        let mut test_run = TestRun::new(run_id, test);

        match self.await_completion(&mut test_run).await? {
            Completion::Cancelled => {
                let final_status = self.interrupt(Some(&mut test_run)).await;
                info!("Test run #{} interrupted, final status {final_status}.", test_run.id);
                return Ok(test_run);
            }
            Completion::Ended => {}
        }

        info!(
            "Test run #{} ended with {} status.",
            test_run.id, test_run.state
        );
        self.collect_artifacts(&mut test_run).await?;

        Ok(test_run)
    }

    /// Poll until the run completely ends. Transient failures and session
    /// expiries are absorbed up to their budgets; any successful poll
    /// resets both.
    pub async fn await_completion(&self, test_run: &mut TestRun) -> Result<Completion> {
        let status_service = RunStatusService::new(&self.client);
        let mut counters = RetryCounters::default();
        let mut printer = StatusLinePrinter::default();

        while !test_run.completely_ended() {
            if *self.cancel_rx.borrow() {
                return Ok(Completion::Cancelled);
            }

            sleep(Duration::from_secs(TEST_RUN_POLL_INTERVAL_SECS)).await;

            match status_service.fetch(test_run).await {
                Ok(()) => counters.record_success(),
                Err(err) => {
                    let decision = counters.record_failure(
                        err.is_auth(),
                        TEST_RUN_MAX_RETRY,
                        TEST_RUN_LOGIN_MAX_RETRY,
                    );
                    match decision {
                        RetryDecision::Relogin => {
                            error!("Authentication failed, logging in again ...");
                            if let Err(login_err) = self.client.login().await {
                                error!("Login failed: {login_err}");
                            }
                            continue;
                        }
                        RetryDecision::Fatal => {
                            if err.is_auth() {
                                error!(
                                    "Login retried {TEST_RUN_LOGIN_MAX_RETRY} times, giving up."
                                );
                            } else {
                                error!("Retried {TEST_RUN_MAX_RETRY} times, giving up.");
                            }
                            return Err(err);
                        }
                        RetryDecision::Retry => {
                            error!("Failed to fetch run status: {err}");
                            error!(
                                "Error occurred during test run, retrying ... {}/{}",
                                counters.retries, TEST_RUN_MAX_RETRY
                            );
                            continue;
                        }
                    }
                }
            }

            printer.print(test_run);
        }

        Ok(Completion::Ended)
    }

    /// Issue a stop command without waiting for termination.
    pub async fn abort(&self, test_run: &TestRun) -> Result<()> {
        RunStatusService::new(&self.client).abort(test_run).await
    }

    /// Stop the run and wait (briefly, on a tighter cadence) for it to
    /// reach a terminal status. Giving up is not an error; the run keeps
    /// whatever state was last observed.
    pub async fn stop(&self, test_run: &mut TestRun) -> Result<()> {
        let status_service = RunStatusService::new(&self.client);
        status_service.abort(test_run).await?;

        let mut attempts = 0;
        while attempts < STOP_RUN_MAX_RETRY {
            sleep(Duration::from_secs(STOP_RUN_POLL_INTERVAL_SECS)).await;
            if let Err(err) = status_service.fetch(test_run).await {
                warn!("Failed to fetch run status while stopping: {err}");
            }
            if test_run.state.is_ended() {
                return Ok(());
            }
            attempts += 1;
        }

        warn!(
            "Run #{} did not reach a terminal status after {STOP_RUN_MAX_RETRY} checks, giving up.",
            test_run.id
        );
        Ok(())
    }

    /// Cancellation entry point. Reports the status the caller should
    /// record; downloads artifacts only when the run actually ended.
    pub async fn interrupt(&self, test_run: Option<&mut TestRun>) -> RunStatus {
        let Some(test_run) = test_run else {
            info!("Test run is not started yet, aborting ...");
            info!("Check the service dashboard in case the run needs a manual stop.");
            return RunStatus::Aborted;
        };

        if test_run.state == RunStatus::Initializing {
            info!("Aborting test run #{} ...", test_run.id);
            if let Err(err) = self.abort(test_run).await {
                warn!("Failed to abort run #{}: {err}", test_run.id);
            }
            return RunStatus::Aborted;
        }

        info!("Stopping test run #{} ...", test_run.id);
        if let Err(err) = self.stop(test_run).await {
            warn!("Failed to stop run #{}: {err}", test_run.id);
        }

        if !test_run.completely_ended() {
            return RunStatus::Aborted;
        }

        // The run did end: finish the normal completion path and report
        // the real terminal status rather than a synthetic ABORTED.
        if let Err(err) = self.collect_artifacts(test_run).await {
            warn!(
                "Failed to collect artifacts for run #{}: {err}",
                test_run.id
            );
        }
        test_run.state
    }

    /// Final artifact retrieval. Runs with no report still get the XML
    /// summary so downstream consumers always receive at least one file.
    async fn collect_artifacts(&self, test_run: &mut TestRun) -> Result<()> {
        RunStatusService::new(&self.client)
            .fetch_status(test_run)
            .await?;

        let reports = ReportService::new(&self.client, &self.options);
        if test_run.has_report {
            reports.download_all(test_run, &["csv", "pdf"]).await?;
        } else {
            info!("Test run #{} doesn't have run results.", test_run.id);
            reports.attach_summary_xml(test_run);
        }
        Ok(())
    }

    /// Build the trending snapshot for a finished run, resolving the
    /// configured benchmark run when one is named.
    pub async fn fetch_trending(
        &self,
        test_run: &TestRun,
        benchmark: Option<u32>,
    ) -> Result<crate::model::TrendingSnapshot> {
        let reports = ReportService::new(&self.client, &self.options);

        let benchmark_snapshot = match benchmark {
            Some(benchmark_run_id) => {
                let status_service = RunStatusService::new(&self.client);
                match status_service.fetch_by_id(benchmark_run_id).await {
                    Ok(benchmark_run) => {
                        Some(reports.build_snapshot(&benchmark_run, None).await?)
                    }
                    Err(err) => {
                        warn!("Failed to fetch benchmark run #{benchmark_run_id}: {err}");
                        None
                    }
                }
            }
            None => None,
        };

        let mut snapshot = reports.build_snapshot(test_run, benchmark_snapshot).await?;
        snapshot.benchmark_id = benchmark;
        Ok(snapshot)
    }
}
