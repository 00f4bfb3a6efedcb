//! Report export
//!
//! Renders an aggregated `Report` as text, markdown, JSON or spreadsheet-style
//! CSV sheets. Missing values are shown as `N/A` rather than failing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::aggregate::{Report, TestRow};

const NOT_AVAILABLE: &str = "N/A";

/// Report output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            "json" => Some(ReportFormat::Json),
            "csv" | "sheets" => Some(ReportFormat::Csv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Text => "text/plain; charset=utf-8",
            ReportFormat::Markdown => "text/markdown; charset=utf-8",
            ReportFormat::Json => "application/json",
            ReportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// One tabular sheet of an export
#[derive(Clone, Debug, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    fn new(name: impl Into<String>, headers: &[&str]) -> Self {
        Self {
            name: name.into(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer.into_inner().context("Failed to flush CSV")?;
        String::from_utf8(bytes).context("CSV output was not UTF-8")
    }
}

/// Report generator
pub struct ReportGenerator;

impl ReportGenerator {
    /// Render a report into a single document. CSV yields the main sheet only.
    pub fn render(report: &Report, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(Self::format_text(report)),
            ReportFormat::Markdown => Ok(Self::format_markdown(report)),
            ReportFormat::Json => {
                serde_json::to_string_pretty(report).context("Failed to serialize report")
            }
            ReportFormat::Csv => {
                let sheets = Self::sheets(report);
                let main = sheets
                    .get(1)
                    .or_else(|| sheets.first())
                    .context("Report has no sheets")?;
                main.to_csv()
            }
        }
    }

    /// Write the report under `dir`. CSV writes a directory of sheets.
    pub fn export(
        report: &Report,
        format: ReportFormat,
        dir: &Path,
        name: Option<&str>,
    ) -> Result<PathBuf> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_export_name(report, Utc::now()));

        let path = match format {
            ReportFormat::Csv => {
                let sheet_dir = dir.join(&name);
                fs::create_dir_all(&sheet_dir)
                    .with_context(|| format!("Failed to create {}", sheet_dir.display()))?;
                for sheet in Self::sheets(report) {
                    let path = sheet_dir.join(format!("{}.csv", sheet.name));
                    let mut writer = csv::Writer::from_path(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    writer.write_record(&sheet.headers)?;
                    for row in &sheet.rows {
                        writer.write_record(row)?;
                    }
                    writer.flush()?;
                }
                sheet_dir
            }
            _ => {
                fs::create_dir_all(dir)?;
                let path = dir.join(format!("{}.{}", name, format.extension()));
                fs::write(&path, Self::render(report, format)?)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                path
            }
        };

        info!("Exported report to {}", path.display());
        Ok(path)
    }

    /// Summary first, then either the all-tests and per-method sheets for
    /// API jobs or the element sheet for UI jobs.
    pub fn sheets(report: &Report) -> Vec<Sheet> {
        let mut sheets = vec![Self::summary_sheet(report)];

        if report.kind.is_ui() {
            let mut details = Sheet::new("ui_details", &["Element", "Action", "Result"]);
            for row in &report.ui_details {
                details
                    .rows
                    .push(vec![row.element.clone(), row.action.clone(), row.result.clone()]);
            }
            sheets.push(details);
            return sheets;
        }

        let mut all = Sheet::new("all_tests", &TEST_HEADERS);
        all.rows = report.all_tests.iter().map(test_row).collect();
        sheets.push(all);

        for group in &report.by_method {
            let mut sheet = Sheet::new(format!("{}_tests", group.method), &TEST_HEADERS);
            sheet.rows = report
                .all_tests
                .iter()
                .filter(|t| t.method == group.method)
                .map(test_row)
                .collect();
            if !sheet.rows.is_empty() {
                sheets.push(sheet);
            }
        }
        sheets
    }

    fn summary_sheet(report: &Report) -> Sheet {
        let mut sheet = Sheet::new("summary", &["Property", "Value"]);
        let counts = &report.counts;
        let rows = [
            ("Job ID", report.job_id.clone()),
            ("Name", or_na(report.name.clone())),
            ("Kind", report.kind.to_string()),
            ("Status", report.status.to_string()),
            ("Created", format_datetime(&report.created_at)),
            ("Completed", or_na(report.completed_at.as_ref().map(format_datetime))),
            (
                "Endpoints",
                format!("{}/{}", counts.terminal_endpoints, counts.endpoints),
            ),
            ("Probes", counts.probes.to_string()),
            ("Passed", counts.passed.to_string()),
            ("Failed", counts.failed.to_string()),
            ("Pass Rate", format_rate(report.overall_pass_rate)),
            ("Error", or_na(report.error.clone())),
        ];
        for (key, value) in rows {
            sheet.rows.push(vec![key.to_string(), value]);
        }
        sheet
    }

    fn format_text(report: &Report) -> String {
        let mut output = String::new();

        writeln!(output, "\n{:=^78}", " Test Report ").unwrap();
        writeln!(output).unwrap();
        writeln!(output, "Job: {}", report.job_id).unwrap();
        if let Some(name) = &report.name {
            writeln!(output, "Name: {name}").unwrap();
        }
        writeln!(output, "Kind: {}", report.kind).unwrap();
        writeln!(output, "Status: {}", report.status).unwrap();
        writeln!(output, "Created: {}", format_datetime(&report.created_at)).unwrap();
        if let Some(done) = &report.completed_at {
            writeln!(output, "Completed: {}", format_datetime(done)).unwrap();
        }
        if let Some(error) = &report.error {
            writeln!(output, "Error: {error}").unwrap();
        }
        writeln!(
            output,
            "Pass Rate: {} ({}/{} probes)",
            format_rate(report.overall_pass_rate),
            report.counts.passed,
            report.counts.probes
        )
        .unwrap();
        if !report.complete {
            writeln!(
                output,
                "Still running: {} probes outstanding",
                report.counts.outstanding
            )
            .unwrap();
        }

        for group in &report.by_method {
            writeln!(
                output,
                "\n{:-^78}",
                format!(" {} ({}) ", group.method, format_rate(group.pass_rate))
            )
            .unwrap();
            for endpoint in &group.endpoints {
                writeln!(
                    output,
                    "{} {} [{}/{}]",
                    endpoint.status.symbol(),
                    endpoint.name.as_deref().unwrap_or(&endpoint.url),
                    endpoint.passed,
                    endpoint.expected
                )
                .unwrap();
                for row in report
                    .all_tests
                    .iter()
                    .filter(|t| t.endpoint_task_id == endpoint.task_id)
                {
                    writeln!(
                        output,
                        "    {} {:<18} {:>10} {}",
                        row.status.symbol(),
                        row.probe_type.name(),
                        row.response_time_ms
                            .map(|ms| format!("{ms:.1}ms"))
                            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                        row.error.as_deref().unwrap_or("")
                    )
                    .unwrap();
                }
            }
        }

        if !report.ui_details.is_empty() {
            writeln!(output, "\n{:-^78}", " Elements ").unwrap();
            for row in &report.ui_details {
                writeln!(
                    output,
                    "{:<10} {:<40} {:<14} {}",
                    row.probe_type.as_str(),
                    truncate(&row.element, 40),
                    row.action,
                    row.result
                )
                .unwrap();
            }
        }

        writeln!(output, "\n{:=^78}", "").unwrap();
        output
    }

    fn format_markdown(report: &Report) -> String {
        let mut output = String::new();

        writeln!(output, "# Test Report\n").unwrap();
        writeln!(output, "## Summary\n").unwrap();
        writeln!(output, "| Property | Value |").unwrap();
        writeln!(output, "|----------|-------|").unwrap();
        for row in Self::summary_sheet(report).rows {
            writeln!(output, "| {} | {} |", row[0], escape_md(&row[1])).unwrap();
        }

        if report.kind.is_ui() {
            writeln!(output, "\n## Elements\n").unwrap();
            writeln!(output, "| Element | Action | Result |").unwrap();
            writeln!(output, "|---------|--------|--------|").unwrap();
            for row in &report.ui_details {
                writeln!(
                    output,
                    "| {} | {} | {} |",
                    escape_md(&row.element),
                    row.action,
                    escape_md(&row.result)
                )
                .unwrap();
            }
            return output;
        }

        for group in &report.by_method {
            writeln!(
                output,
                "\n## {} ({})\n",
                group.method,
                format_rate(group.pass_rate)
            )
            .unwrap();
            writeln!(output, "| Endpoint | Test | Status | Time (ms) | Code | Error |").unwrap();
            writeln!(output, "|----------|------|--------|-----------|------|-------|").unwrap();
            for row in report.all_tests.iter().filter(|t| t.method == group.method) {
                writeln!(
                    output,
                    "| {} | {} | {} | {} | {} | {} |",
                    escape_md(&row.endpoint),
                    row.probe_type.name(),
                    row.status,
                    opt(row.response_time_ms.map(|ms| format!("{ms:.1}"))),
                    opt(row.status_code),
                    escape_md(row.error.as_deref().unwrap_or("")),
                )
                .unwrap();
            }
        }

        output
    }
}

const TEST_HEADERS: [&str; 9] = [
    "Endpoint",
    "URL",
    "Method",
    "Test",
    "Status",
    "Response Time (ms)",
    "Status Code",
    "Response Size",
    "Error",
];

fn test_row(row: &TestRow) -> Vec<String> {
    vec![
        row.endpoint.clone(),
        row.url.clone(),
        row.method.clone(),
        row.probe_type.name().to_string(),
        row.status.to_string(),
        opt(row.response_time_ms.map(|ms| format!("{ms:.1}"))),
        opt(row.status_code),
        opt(row.response_size),
        or_na(row.error.clone()),
    ]
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn or_na(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Percentage with one decimal, or N/A when nothing finished
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{rate:.1}%"),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// `<kind>_test_result_<subject>_<timestamp>`
pub fn default_export_name(report: &Report, now: DateTime<Utc>) -> String {
    format!(
        "{}_test_result_{}_{}",
        report.kind.as_str().replace('-', "_"),
        sanitize(report.subject()),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Keep alphanumerics, collapse everything else into single underscores
fn sanitize(s: &str) -> String {
    let s = s
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let mut out = String::new();
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_matches('_');
    if out.is_empty() {
        "job".to_string()
    } else {
        truncate_plain(out, 50)
    }
}

fn truncate_plain(s: &str, max_len: usize) -> String {
    s.chars().take(max_len).collect()
}

fn escape_md(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EndpointSpec, JobRecord, ProbeMetrics, ProbeResult, ProbeType, Submission, SubCheck,
        TestConfig, UiCheck,
    };
    use crate::results::aggregate;
    use tempfile::TempDir;

    fn api_report() -> Report {
        let mut record = JobRecord::from_submission(&Submission::api(
            vec![
                EndpointSpec::get("https://api.example.com/users"),
                EndpointSpec::new("https://api.example.com/users", "POST"),
            ],
            TestConfig::default(),
        ));
        for task in record.tasks.iter_mut() {
            for probe in ProbeType::api() {
                let result = if task.method == "POST" && probe == ProbeType::ErrorCases {
                    ProbeResult::fault(&task.id, probe, "connection reset")
                } else {
                    ProbeResult::from_sub_checks(
                        &task.id,
                        probe,
                        ProbeMetrics {
                            response_time_ms: Some(20.0),
                            status_code: Some(200),
                            response_size: Some(128),
                            ..ProbeMetrics::default()
                        },
                        vec![SubCheck::passed("ok")],
                    )
                };
                task.record(result);
            }
        }
        aggregate(&record)
    }

    fn ui_report() -> Report {
        let mut record = JobRecord::from_submission(&Submission::ui(
            "https://shop.example.com",
            TestConfig::default(),
        ));
        let task = &mut record.tasks[0];
        let id = task.id.clone();
        task.record(ProbeResult::from_ui_checks(
            &id,
            ProbeType::Links,
            vec![UiCheck::new("https://shop.example.com/cart", "a", "navigate")],
        ));
        aggregate(&record)
    }

    #[test]
    fn test_report_format() {
        assert_eq!(ReportFormat::from_str("md"), Some(ReportFormat::Markdown));
        assert_eq!(ReportFormat::from_str("CSV"), Some(ReportFormat::Csv));
        assert_eq!(ReportFormat::from_str("json"), Some(ReportFormat::Json));
        assert!(ReportFormat::from_str("unknown").is_none());
    }

    #[test]
    fn test_api_sheets() {
        let sheets = ReportGenerator::sheets(&api_report());
        let names: Vec<&str> = sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["summary", "all_tests", "GET_tests", "POST_tests"]);
        assert_eq!(sheets[1].rows.len(), 8);
        assert_eq!(sheets[2].rows.len(), 4);

        let failed = &sheets[3].rows[3];
        assert_eq!(failed[3], "Error Cases");
        assert_eq!(failed[4], "failed");
        assert_eq!(failed[5], "N/A");
        assert_eq!(failed[8], "connection reset");

        let rate = sheets[0].rows.iter().find(|r| r[0] == "Pass Rate").unwrap();
        assert_eq!(rate[1], "87.5%");
    }

    #[test]
    fn test_ui_sheets() {
        let sheets = ReportGenerator::sheets(&ui_report());
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[1].name, "ui_details");
        assert_eq!(sheets[1].headers, vec!["Element", "Action", "Result"]);
        assert_eq!(
            sheets[1].rows[0],
            vec!["https://shop.example.com/cart", "navigate", "passed"]
        );
    }

    #[test]
    fn test_missing_pass_rate_renders_na() {
        let record = JobRecord::from_submission(&Submission::api(
            vec![EndpointSpec::get("/a")],
            TestConfig::default(),
        ));
        let report = aggregate(&record);
        let text = ReportGenerator::render(&report, ReportFormat::Text).unwrap();
        assert!(text.contains("Pass Rate: N/A (0/0 probes)"));
        assert!(text.contains("Still running: 4 probes outstanding"));
    }

    #[test]
    fn test_markdown_and_json() {
        let report = api_report();
        let md = ReportGenerator::render(&report, ReportFormat::Markdown).unwrap();
        assert!(md.contains("## GET (100.0%)"));
        assert!(md.contains("## POST (75.0%)"));

        let json = ReportGenerator::render(&report, ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["allTests"].as_array().unwrap().len(), 8);
        assert_eq!(value["overallPassRate"], 87.5);
    }

    #[test]
    fn test_render_csv_uses_main_sheet() {
        let csv = ReportGenerator::render(&api_report(), ReportFormat::Csv).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("Endpoint,URL,Method,Test"));
        assert_eq!(lines.count(), 8);
    }

    #[test]
    fn test_export_csv_directory() {
        let dir = TempDir::new().unwrap();
        let path = ReportGenerator::export(
            &api_report(),
            ReportFormat::Csv,
            dir.path(),
            Some("users"),
        )
        .unwrap();

        assert_eq!(path, dir.path().join("users"));
        for sheet in ["summary", "all_tests", "GET_tests", "POST_tests"] {
            assert!(path.join(format!("{sheet}.csv")).exists(), "{sheet}");
        }
    }

    #[test]
    fn test_export_single_file() {
        let dir = TempDir::new().unwrap();
        let report = ui_report();
        let path =
            ReportGenerator::export(&report, ReportFormat::Markdown, dir.path(), None).unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("ui_test_result_shop_example_com_"));
        assert!(name.ends_with(".md"));
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("| https://shop.example.com/cart | navigate | passed |"));
    }

    #[test]
    fn test_default_export_name() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = default_export_name(&api_report(), now);
        assert_eq!(
            name,
            "api_batch_test_result_api_example_com_users_20240501_102030"
        );
    }

    #[test]
    fn test_sanitize_and_truncate() {
        assert_eq!(sanitize("http://a.b/c?d=1"), "a_b_c_d_1");
        assert_eq!(sanitize("///"), "job");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }
}
