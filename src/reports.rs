use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::api;
use crate::artifacts;
use crate::client::ApiClient;
use crate::config::{
    TestRunOptions, REPORT_MAX_RETRY, REPORT_MAX_RETRY_PDF, REPORT_POLL_INTERVAL_SECS,
};
use crate::error::{LoadCtlError, Result};
use crate::model::{RunResults, TestRun, TransactionRow, TrendingSnapshot};

/// Outcome of a single report-readiness probe. The caller owns the retry
/// loop; a probe never blocks.
#[derive(Debug)]
pub enum ReportProbe {
    Ready(Vec<u8>),
    NotReady,
}

/// Classify a probe response. Ready/not-ready is negotiated through the
/// content type; anything off-protocol is fatal and not retried.
pub fn classify_probe(
    status: u16,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<ReportProbe> {
    if status != 200 {
        return Ok(ReportProbe::NotReady);
    }

    let content_type = content_type.unwrap_or_default();
    if content_type.contains("application/json") {
        let parsed: serde_json::Value = serde_json::from_slice(body)
            .map_err(|_| LoadCtlError::Protocol("report probe body is not JSON".to_string()))?;
        return if parsed.get("message").and_then(|m| m.as_str()) == Some("In progress") {
            Ok(ReportProbe::NotReady)
        } else {
            Err(LoadCtlError::Protocol(format!(
                "report probe returned invalid status: {parsed}"
            )))
        };
    }

    if content_type.contains("application/octet-stream") {
        return Ok(ReportProbe::Ready(body.to_vec()));
    }

    Err(LoadCtlError::Protocol(format!(
        "unknown report content type: {content_type}"
    )))
}

/// Per-format probe ceiling; PDF rendering needs far longer on the backend.
pub fn max_retries_for(report_type: &str) -> u32 {
    if report_type == "pdf" {
        REPORT_MAX_RETRY_PDF
    } else {
        REPORT_MAX_RETRY
    }
}

/// Requests report generation, polls artifact readiness, downloads the
/// results, and synthesizes the summary artifacts.
pub struct ReportService<'a> {
    client: &'a ApiClient,
    options: &'a TestRunOptions,
}

impl<'a> ReportService<'a> {
    pub fn new(client: &'a ApiClient, options: &'a TestRunOptions) -> Self {
        ReportService { client, options }
    }

    /// Download every requested report format into the run's artifact map,
    /// then synthesize the XML summary and transaction CSV. A format that
    /// never becomes ready is logged and skipped; it does not abort the
    /// rest of the download.
    pub async fn download_all(&self, test_run: &mut TestRun, report_types: &[&str]) -> Result<()> {
        let valid: &[&str] = if self.options.skip_pdf_report {
            &["csv"]
        } else {
            &["csv", "pdf"]
        };
        let filtered: Vec<&str> = report_types
            .iter()
            .copied()
            .filter(|t| valid.contains(t))
            .collect();

        if filtered.is_empty() {
            info!("No valid report types in {report_types:?}, skipping report downloads");
        }

        for report_type in filtered {
            match self.download_one(test_run, report_type).await? {
                Some(content) => {
                    let file_name = artifacts::report_file_name(
                        report_type,
                        &self.client.config().tenant_id,
                        test_run.id,
                    );
                    info!("Report {file_name} downloaded.");
                    test_run.reports.insert(file_name, content);
                }
                None => {
                    warn!("Report ({report_type}) for run #{} never became ready, skipping", test_run.id);
                }
            }
        }

        self.attach_summary_xml(test_run);
        self.attach_transactions_csv(test_run).await?;

        Ok(())
    }

    /// Request one format and poll until ready or the per-format ceiling
    /// is exhausted. `None` means the ceiling was exhausted.
    async fn download_one(&self, test_run: &TestRun, report_type: &str) -> Result<Option<Vec<u8>>> {
        let report_id = self.request_report(test_run.id, report_type).await?;
        let max_retry = max_retries_for(report_type);

        let mut attempts = 0;
        while attempts < max_retry {
            match self.poll_report(report_id).await? {
                ReportProbe::Ready(bytes) => return Ok(Some(bytes)),
                ReportProbe::NotReady => {
                    debug!("report #{report_id} ({report_type}) not ready yet...");
                    attempts += 1;
                    sleep(Duration::from_secs(REPORT_POLL_INTERVAL_SECS)).await;
                }
            }
        }

        Ok(None)
    }

    /// Ask the backend to render a report. Returns the report id.
    pub async fn request_report(&self, run_id: u32, report_type: &str) -> Result<u64> {
        let path = api::gen_run_report(run_id);
        let payload = json!({ "reportType": report_type });
        let response = self.client.post(&path, &[], &payload).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(LoadCtlError::from_transport)?;

        if status != 200 {
            return Err(LoadCtlError::service(status, &body));
        }
        debug!("requested report: {body}");

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|_| {
            LoadCtlError::Protocol(format!("report request response is not JSON: {body}"))
        })?;
        parsed
            .get("reportId")
            .and_then(|id| id.as_u64())
            .ok_or_else(|| {
                LoadCtlError::Protocol(format!("report request response has no reportId: {body}"))
            })
    }

    /// One readiness probe.
    pub async fn poll_report(&self, report_id: u64) -> Result<ReportProbe> {
        let path = api::run_report(report_id);
        let response = self.client.get(&path, &[]).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.bytes().await.map_err(LoadCtlError::from_transport)?;

        classify_probe(status, content_type.as_deref(), &body)
    }

    /// The minimal artifact every run gets, report or not.
    pub fn attach_summary_xml(&self, test_run: &mut TestRun) {
        let config = self.client.config();
        let report_url = format!(
            "{}/run-overview/{}/report/?TENANTID={}&projectId={}",
            config.url, test_run.id, config.tenant_id, config.project_id
        );
        let dashboard_url = format!(
            "{}/run-overview/{}/dashboard/?TENANTID={}&projectId={}",
            config.url, test_run.id, config.tenant_id, config.project_id
        );
        info!("View report at: {report_url}");
        info!("View dashboard at: {dashboard_url}");

        let file_name = artifacts::report_file_name("xml", &config.tenant_id, test_run.id);
        let content = artifacts::run_summary_xml(test_run, &report_url, &dashboard_url);
        test_run.reports.insert(file_name, content.into_bytes());
    }

    async fn attach_transactions_csv(&self, test_run: &mut TestRun) -> Result<()> {
        let transactions = self.fetch_transactions(test_run.id).await?;
        let file_name =
            artifacts::transactions_file_name(&self.client.config().tenant_id, test_run.id);
        let content = artifacts::transactions_csv(&transactions);
        test_run.reports.insert(file_name, content.into_bytes());
        Ok(())
    }

    pub async fn fetch_results(&self, run_id: u32) -> Result<RunResults> {
        let path = api::run_results(run_id);
        let response = self.client.get(&path, &[]).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(LoadCtlError::from_transport)?;

        if status != 200 {
            return Err(LoadCtlError::service(status, &body));
        }
        debug!("fetched run results: {body}");

        serde_json::from_str(&body).map_err(|e| {
            LoadCtlError::Protocol(format!("failed to parse run results: {e}: {body}"))
        })
    }

    pub async fn fetch_transactions(&self, run_id: u32) -> Result<Vec<TransactionRow>> {
        let path = api::run_transactions(run_id);
        let response = self.client.get(&path, &[]).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(LoadCtlError::from_transport)?;

        if status != 200 {
            return Err(LoadCtlError::service(status, &body));
        }
        debug!("fetched run transactions: {body}");

        serde_json::from_str(&body).map_err(|e| {
            LoadCtlError::Protocol(format!("failed to parse run transactions: {e}: {body}"))
        })
    }

    /// Build the machine-readable summary record that feeds trend analysis.
    pub async fn build_snapshot(
        &self,
        test_run: &TestRun,
        benchmark: Option<TrendingSnapshot>,
    ) -> Result<TrendingSnapshot> {
        let results = self.fetch_results(test_run.id).await?;
        let transactions = self.fetch_transactions(test_run.id).await?;
        Ok(TrendingSnapshot::from_run(
            test_run,
            &results,
            &transactions,
            &self.client.config().tenant_id,
            benchmark,
        ))
    }
}
