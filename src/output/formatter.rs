//! Terminal formatters for jobs and reports
//!
//! Provides table, JSON, and one-line summary output.

use chrono::{DateTime, Utc};

use crate::models::{JobSnapshot, ProbeStatus, TaskStatus};
use crate::poller::PollState;
use crate::results::{format_rate, JobSummary, Report};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// One progress line for a status snapshot
    pub fn format_progress(&self, snapshot: &JobSnapshot) -> String {
        let percent = if snapshot.total_endpoints == 0 {
            0.0
        } else {
            snapshot.completed_endpoints as f64 / snapshot.total_endpoints as f64 * 100.0
        };
        let filled = ((percent / 5.0) as usize).min(20);
        format!(
            "{} {:<9} {}{} {:>3}/{:<3} {:5.1}%",
            snapshot.status.symbol(),
            snapshot.status.to_string(),
            "█".repeat(filled),
            "░".repeat(20 - filled),
            snapshot.completed_endpoints,
            snapshot.total_endpoints,
            percent
        )
    }

    /// What the poller ended with
    pub fn format_poll_outcome(&self, id: &str, state: &PollState) -> String {
        match state {
            PollState::Done(snapshot) => format!("Test {id} finished: {snapshot}"),
            PollState::TimedOut(Some(snapshot)) => {
                format!("Test {id} is still running ({snapshot}), check later")
            }
            PollState::TimedOut(None) => format!("Test {id} status unknown, check later"),
            other => format!("Test {id}: {other}"),
        }
    }

    /// Job listing
    pub fn format_jobs(&self, jobs: &[JobSummary]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(jobs).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(jobs).unwrap_or_default(),
            OutputFormat::Summary => jobs
                .iter()
                .map(|job| {
                    format!(
                        "{} {} {} ({})",
                        job.status.symbol(),
                        job.id,
                        job.name.as_deref().unwrap_or(job.kind.as_str()),
                        format_rate(job.pass_rate)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            OutputFormat::Table => self.format_jobs_table(jobs),
        }
    }

    fn format_jobs_table(&self, jobs: &[JobSummary]) -> String {
        let mut output = String::new();

        output.push_str(
            "\n┌────────────────────────────────┬───────────┬──────────────────────┬───────────┬─────────┬──────────┬─────────────────────┐\n",
        );
        output.push_str(
            "│ ID                             │ Kind      │ Name                 │ Status    │ Done    │ Rate     │ Created             │\n",
        );
        output.push_str(
            "├────────────────────────────────┼───────────┼──────────────────────┼───────────┼─────────┼──────────┼─────────────────────┤\n",
        );

        for job in jobs {
            output.push_str(&format!(
                "│ {:30} │ {:9} │ {:20} │ {:9} │ {:>7} │ {:>8} │ {:19} │\n",
                clip(&job.id, 30),
                job.kind.as_str(),
                clip(job.name.as_deref().unwrap_or("-"), 20),
                job.status.to_string(),
                format!("{}/{}", job.completed_endpoints, job.total_endpoints),
                self.paint_rate(job.pass_rate, 8),
                format_time(&job.created_at),
            ));
        }

        output.push_str(
            "└────────────────────────────────┴───────────┴──────────────────────┴───────────┴─────────┴──────────┴─────────────────────┘\n",
        );
        output.push_str(&format!(" {} job(s)\n", jobs.len()));
        output
    }

    /// Full report
    pub fn format_report(&self, report: &Report) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Summary => self.format_report_brief(report),
            OutputFormat::Table => self.format_report_table(report),
        }
    }

    fn format_report_brief(&self, report: &Report) -> String {
        format!(
            "{} [{}]: {}/{} probes passed ({}) across {} endpoint(s)",
            report.subject(),
            report.status,
            report.counts.passed,
            report.counts.probes,
            format_rate(report.overall_pass_rate),
            report.counts.endpoints
        )
    }

    fn format_report_table(&self, report: &Report) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" {} ({})\n", report.subject(), report.kind));
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(" Test ID:   {}\n", report.job_id));
        output.push_str(&format!(" Status:    {} {}\n", report.status.symbol(), report.status));
        if let Some(error) = &report.error {
            output.push_str(&format!(" Error:     {error}\n"));
        }
        output.push_str(&format!(
            " Pass Rate: {} ({}/{} probes, {}/{} endpoints)\n",
            self.paint_rate(report.overall_pass_rate, 0),
            report.counts.passed,
            report.counts.probes,
            report.counts.terminal_endpoints,
            report.counts.endpoints
        ));

        for group in &report.by_method {
            output.push_str(&format!(
                "\n {} {}\n",
                group.method,
                self.paint_rate(group.pass_rate, 0)
            ));
            output.push_str(" ───────────────────────────────────────────────────────────\n");
            for endpoint in &group.endpoints {
                output.push_str(&format!(
                    " {} {} [{}/{}]\n",
                    self.task_symbol(endpoint.status),
                    endpoint.name.as_deref().unwrap_or(&endpoint.url),
                    endpoint.passed,
                    endpoint.expected
                ));
                for row in report
                    .all_tests
                    .iter()
                    .filter(|row| row.endpoint_task_id == endpoint.task_id)
                {
                    let time = row
                        .response_time_ms
                        .map(|ms| format!("{ms:.1}ms"))
                        .unwrap_or_else(|| "N/A".to_string());
                    output.push_str(&format!(
                        "     {} {:18} {:>10}  {}\n",
                        self.probe_symbol(row.status),
                        row.probe_type.name(),
                        time,
                        row.error.as_deref().unwrap_or("")
                    ));
                }
            }
        }

        if !report.ui_details.is_empty() {
            output.push_str("\n Elements\n");
            output.push_str(" ───────────────────────────────────────────────────────────\n");
            for row in &report.ui_details {
                output.push_str(&format!(
                    "   {:8} {:40} {:12} {}\n",
                    row.probe_type.as_str(),
                    clip(&row.element, 40),
                    row.action,
                    row.result
                ));
            }
        }

        output
    }

    fn probe_symbol(&self, status: ProbeStatus) -> String {
        if !self.colorize {
            return status.symbol().to_string();
        }
        match status {
            ProbeStatus::Passed => format!("\x1b[32m{}\x1b[0m", status.symbol()),
            ProbeStatus::Failed => format!("\x1b[31m{}\x1b[0m", status.symbol()),
        }
    }

    fn task_symbol(&self, status: TaskStatus) -> String {
        if !self.colorize {
            return status.symbol().to_string();
        }
        match status {
            TaskStatus::Passed => format!("\x1b[32m{}\x1b[0m", status.symbol()),
            TaskStatus::Failed => format!("\x1b[31m{}\x1b[0m", status.symbol()),
            _ => format!("\x1b[33m{}\x1b[0m", status.symbol()),
        }
    }

    /// Pass rate right-aligned to `width`, coloured by band
    fn paint_rate(&self, rate: Option<f64>, width: usize) -> String {
        let text = format!("{:>width$}", format_rate(rate));
        match rate {
            Some(r) if self.colorize => {
                if r >= 90.0 {
                    format!("\x1b[32m{text}\x1b[0m")
                } else if r >= 50.0 {
                    format!("\x1b[33m{text}\x1b[0m")
                } else {
                    format!("\x1b[31m{text}\x1b[0m")
                }
            }
            _ => text,
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

fn format_time(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
