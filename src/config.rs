use clap::Parser;
use std::path::PathBuf;

/// loadctl — runs a cloud load test from CI and collects its artifacts.
#[derive(Parser, Debug, Clone)]
#[command(name = "loadctl")]
pub struct CliArgs {
    /// Base URL of the load-testing service
    #[arg(long = "url", env = "LOADCTL_URL")]
    pub url: String,

    /// Username, or an OAuth client id
    #[arg(long = "username", env = "LOADCTL_USERNAME")]
    pub username: String,

    /// Password, or an OAuth client secret
    #[arg(long = "password", env = "LOADCTL_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Tenant id; empty for single-tenant deployments
    #[arg(long = "tenant-id", env = "LOADCTL_TENANT_ID", default_value = "")]
    pub tenant_id: String,

    /// Project id the test belongs to
    #[arg(long = "project-id", env = "LOADCTL_PROJECT_ID")]
    pub project_id: u32,

    /// Id of the load test to run
    #[arg(short = 't', long = "test-id", env = "LOADCTL_TEST_ID")]
    pub test_id: u32,

    /// Ask the service to email the run report
    #[arg(long = "send-email")]
    pub send_email: bool,

    /// Skip the PDF report (the slowest format to render)
    #[arg(long = "skip-pdf-report", env = "LOADCTL_SKIP_PDF_REPORT")]
    pub skip_pdf_report: bool,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug", env = "LOADCTL_DEBUG_LOG")]
    pub debug: bool,

    /// Directory to write artifacts into
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    /// Snapshot history file maintained across builds
    #[arg(long = "history-file")]
    pub history_file: Option<PathBuf>,

    /// CI build number recorded with the trending snapshot
    #[arg(long = "build-id", env = "LOADCTL_BUILD_ID", default_value_t = 0)]
    pub build_id: u32,

    /// Run id to use as the trending benchmark; omit to compare to previous
    #[arg(long = "benchmark")]
    pub benchmark: Option<u32>,

    /// Log file for a copy of the console output
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Proxy URL, e.g. http://proxy:8080
    #[arg(long = "proxy", env = "LOADCTL_PROXY")]
    pub proxy: Option<String>,

    /// Proxy username
    #[arg(long = "proxy-username", env = "LOADCTL_PROXY_USERNAME")]
    pub proxy_username: Option<String>,

    /// Proxy password
    #[arg(long = "proxy-password", env = "LOADCTL_PROXY_PASSWORD", hide_env_values = true)]
    pub proxy_password: Option<String>,

    /// How many historical runs feed the trending report
    #[arg(long = "runs-count", default_value_t = 5)]
    pub runs_count: u32,

    /// Avg response time: improvement threshold (percent)
    #[arg(long = "avg-improvement", default_value_t = 5)]
    pub avg_improvement: i32,

    /// Avg response time: minor regression threshold (percent)
    #[arg(long = "avg-minor-regression", default_value_t = 5)]
    pub avg_minor_regression: i32,

    /// Avg response time: major regression threshold (percent)
    #[arg(long = "avg-major-regression", default_value_t = 10)]
    pub avg_major_regression: i32,

    /// Percentile response time: improvement threshold (percent)
    #[arg(long = "pctl-improvement", default_value_t = 5)]
    pub pctl_improvement: i32,

    /// Percentile response time: minor regression threshold (percent)
    #[arg(long = "pctl-minor-regression", default_value_t = 5)]
    pub pctl_minor_regression: i32,

    /// Percentile response time: major regression threshold (percent)
    #[arg(long = "pctl-major-regression", default_value_t = 10)]
    pub pctl_major_regression: i32,
}

/// Connection settings for the remote service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub tenant_id: String,
    pub project_id: u32,
    pub proxy: Option<ProxyConfig>,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Per-invocation run options.
#[derive(Debug, Clone)]
pub struct TestRunOptions {
    pub test_id: u32,
    pub send_email: bool,
    pub skip_pdf_report: bool,
}

// Polling constants
pub const TEST_RUN_POLL_INTERVAL_SECS: u64 = 10;
pub const TEST_RUN_MAX_RETRY: u32 = 5;
pub const TEST_RUN_LOGIN_MAX_RETRY: u32 = 3;

// Stop polling runs on a tighter cadence than the main loop
pub const STOP_RUN_POLL_INTERVAL_SECS: u64 = 5;
pub const STOP_RUN_MAX_RETRY: u32 = 6;

// Report readiness probing
pub const REPORT_POLL_INTERVAL_SECS: u64 = 5;
pub const REPORT_MAX_RETRY: u32 = 6;
// PDF rendering is much slower on the backend
pub const REPORT_MAX_RETRY_PDF: u32 = 24;

// HTTP transport
pub const HTTP_TIMEOUT_SECS: u64 = 60;

// Tag sent with run-start requests so the service can attribute them
pub const INITIATOR: &str = "ci-pipeline";

pub const SEPARATOR_LINE: &str = "=====================================";

impl ServerConfig {
    pub fn from_args(args: &CliArgs) -> Self {
        let proxy = args.proxy.as_ref().map(|url| ProxyConfig {
            url: url.clone(),
            username: args.proxy_username.clone(),
            password: args.proxy_password.clone(),
        });

        ServerConfig {
            url: args.url.trim_end_matches('/').to_string(),
            username: args.username.clone(),
            password: args.password.clone(),
            tenant_id: args.tenant_id.clone(),
            project_id: args.project_id,
            proxy,
        }
    }
}

impl TestRunOptions {
    pub fn from_args(args: &CliArgs) -> Self {
        TestRunOptions {
            test_id: args.test_id,
            send_email: args.send_email,
            skip_pdf_report: args.skip_pdf_report,
        }
    }
}
