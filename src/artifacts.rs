//! Synthesized artifacts: the JUnit-style XML run summary and the
//! transaction breakdown CSV. Both are plain string builders; no
//! templating.

use crate::model::{TestRun, TransactionRow};
use crate::status::RunStatus;

pub fn report_file_name(ext: &str, tenant_id: &str, run_id: u32) -> String {
    format!("loadctl_report_{tenant_id}-{run_id}.{ext}")
}

pub fn transactions_file_name(tenant_id: &str, run_id: u32) -> String {
    format!("loadctl_report_trans_{tenant_id}-{run_id}.csv")
}

/// JUnit-style result summary: one testsuite with one testcase, carrying
/// run identity and (once the run completely ended) the report URLs as
/// properties.
pub fn run_summary_xml(test_run: &TestRun, report_url: &str, dashboard_url: &str) -> String {
    let is_failure = test_run.detailed_status != RunStatus::Passed.name();
    let mut time = 0.0;
    if test_run.start_time != -1
        && test_run.end_time != -1
        && test_run.end_time > test_run.start_time
    {
        time = (test_run.end_time - test_run.start_time) as f64 / 1000.0;
    }

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<testsuite name=\"{}\" tests=\"1\" failures=\"{}\">\n",
        xml_escape(&test_run.test.name),
        if is_failure { 1 } else { 0 }
    ));

    out.push_str("  <properties>\n");
    push_property(&mut out, "generator", "loadctl");
    push_property(&mut out, "testId", &test_run.test.id.to_string());
    push_property(&mut out, "runId", &test_run.id.to_string());
    out.push_str(&format!(
        "    <property name=\"statusDescription\">{}</property>\n",
        xml_escape(&test_run.status)
    ));
    if test_run.completely_ended() {
        push_property(&mut out, "reportUrl", report_url);
        push_property(&mut out, "dashboardUrl", dashboard_url);
    }
    out.push_str("  </properties>\n");

    out.push_str(&format!(
        "  <testcase name=\"{}\" status=\"{}\" classname=\"loadctl.LoadTest\" time=\"{:.2}\">\n",
        xml_escape(&test_run.test.name),
        xml_escape(&test_run.detailed_status),
        time
    ));
    if is_failure {
        out.push_str(&format!(
            "    <failure message=\"Test run status is {status}\" type=\"{status}\"/>\n",
            status = xml_escape(&test_run.detailed_status)
        ));
    }
    out.push_str("  </testcase>\n");
    out.push_str("</testsuite>\n");

    out
}

/// Transaction breakdown CSV, one row per transaction.
pub fn transactions_csv(transactions: &[TransactionRow]) -> String {
    let mut out = String::new();
    out.push_str(
        "Script Name,Transaction,%Breakers,SLA Status,AVG Duration,Min,Max,STD. Deviation,\
         Passed,Failed,Percentile,SLA Threshold,Percentile Trend\n",
    );
    for tx in transactions {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            csv_escape(&tx.script_name),
            csv_escape(&tx.name),
            tx.breakers,
            csv_escape(&tx.sla_status),
            tx.avg_trt,
            tx.min_trt,
            tx.max_trt,
            tx.std_deviation,
            tx.passed,
            tx.failed,
            tx.percentile_trt,
            tx.sla_threshold,
            tx.sla_trend,
        ));
    }
    out
}

fn push_property(out: &mut String, name: &str, value: &str) {
    out.push_str(&format!(
        "    <property name=\"{}\" value=\"{}\"/>\n",
        xml_escape(name),
        xml_escape(value)
    ));
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Wrap a field value in quotes and escape any embedded quotes.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
