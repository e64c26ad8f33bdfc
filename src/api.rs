//! API path builders. Query parameters common to every request (tenant,
//! project) are appended by the client, not here.

pub fn load_test(project_id: u32, test_id: u32) -> String {
    format!("v1/projects/{project_id}/load-tests/{test_id}")
}

pub fn start_test_run(project_id: u32, test_id: u32) -> String {
    format!("v1/projects/{project_id}/load-tests/{test_id}/runs")
}

pub fn test_run(run_id: u32) -> String {
    format!("v1/test-runs/{run_id}")
}

pub fn run_status(run_id: u32) -> String {
    format!("v1/test-runs/{run_id}/status")
}

pub fn gen_run_report(run_id: u32) -> String {
    format!("v1/test-runs/{run_id}/reports")
}

pub fn run_report(report_id: u64) -> String {
    format!("v1/test-runs/reports/{report_id}")
}

pub fn run_results(run_id: u32) -> String {
    format!("v1/test-runs/{run_id}/results")
}

pub fn run_transactions(run_id: u32) -> String {
    format!("v1/test-runs/{run_id}/transactions")
}
