//! Plain-text rendering of worker results and task history.

use std::fmt::Write;

use gsc_sync_core::{SyncReport, TaskOutcome, TaskRun, TaskSummary};

const RULE: &str = "========================================";

/// One summary line, e.g. ` [OK] https://example.com/ (web): 120 rows in 3.2s`.
pub fn task_line(task: &TaskSummary) -> String {
    format!(
        " [{}] {} ({}): {} rows in {}s",
        task.outcome.label(),
        task.site_url,
        task.search_type,
        task.rows_fetched,
        task.duration_sec
    )
}

/// The worker summary printed to stdout after a run.
pub fn render_summary(report: &SyncReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, " Summary");
    let _ = writeln!(out, "{RULE}");

    if report.tasks.is_empty() {
        let _ = writeln!(out, " No tasks to run.");
    }
    for task in &report.tasks {
        let _ = writeln!(out, "{}", task_line(task));
        if task.outcome == TaskOutcome::Error {
            let message = task.error.as_deref().unwrap_or("unknown error");
            let _ = writeln!(out, "   -> {message}");
        }
    }

    let _ = writeln!(out, "\nTotal rows fetched: {}", report.rows_fetched());
    out
}

/// Tabular view of recent task runs, newest first.
pub fn render_history(runs: &[TaskRun]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6}  {:<8}  {:<40}  {:<10}  {:<23}  {:>10}  {:>9}",
        "ID", "STATUS", "SITE", "TYPE", "RANGE", "ROWS", "SECONDS"
    );
    for run in runs {
        let _ = writeln!(
            out,
            "{:>6}  {:<8}  {:<40}  {:<10}  {} .. {}  {:>10}  {:>9.2}",
            run.id,
            run.status.as_str(),
            run.site_url,
            run.search_type.as_str(),
            run.date_from,
            run.date_to,
            run.rows_fetched,
            run.duration_sec
        );
    }
    if runs.is_empty() {
        let _ = writeln!(out, "No task runs recorded.");
    }
    out
}
