//! Output formatting utilities for the CLI
//!
//! Tables for pool statistics, per-connection health and scheduled tasks,
//! plus colored status messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use tether_pool::{HealthReport, PoolStats};
use tether_scheduler::{SchedulerStatus, TaskRecord};

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "METRIC")]
    metric: &'static str,
    #[tabled(rename = "VALUE")]
    value: String,
}

fn metric(metric: &'static str, value: impl ToString) -> MetricRow {
    MetricRow {
        metric,
        value: value.to_string(),
    }
}

/// Format pool occupancy and counters as a two-column table
pub fn format_pool_stats(stats: &PoolStats) -> String {
    let active = if stats.active_connection_ids.is_empty() {
        "-".to_string()
    } else {
        stats
            .active_connection_ids
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let rows = vec![
        metric(
            "active",
            format!("{}/{}", stats.active_connections, stats.max_connections),
        ),
        metric("connecting", stats.connecting),
        metric("queued", stats.queue_length),
        metric("acquired", stats.total_acquired),
        metric("released", stats.total_released),
        metric("failed", stats.total_failed),
        metric("timed out", stats.total_timeout),
        metric("avg queue wait", format_millis(stats.avg_queue_wait_ms)),
        metric(
            "avg connection lifetime",
            format_millis(stats.avg_connection_duration_ms),
        ),
        metric("active ids", active),
    ];

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the health report: monitor counters followed by one row per connection
pub fn format_health_report(report: &HealthReport) -> String {
    let monitoring = &report.stats.monitoring;
    let mut output = String::new();

    output.push_str(&format!(
        "Monitoring: {} (every {})\n",
        if monitoring.is_active { "active" } else { "stopped" },
        format_millis(monitoring.check_interval_ms as f64)
    ));
    output.push_str(&format!(
        "Checks: {}  Healthy: {}  Unhealthy: {}  Health rate: {}\n",
        monitoring.total_checks,
        monitoring.total_healthy,
        monitoring.total_unhealthy,
        monitoring
            .health_rate
            .map(|r| format!("{:.1}%", r))
            .unwrap_or_else(|| "-".to_string())
    ));
    output.push_str(&format!(
        "Reconnects: {}  Failed: {}\n",
        monitoring.total_reconnects, monitoring.total_reconnect_failures
    ));

    if report.detailed_health.is_empty() {
        output.push_str("No active connections");
        return output;
    }

    #[derive(Tabled)]
    struct HealthRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "HEALTHY")]
        healthy: String,
        #[tabled(rename = "REASON")]
        reason: String,
    }

    let rows: Vec<HealthRow> = report
        .detailed_health
        .iter()
        .map(|(id, record)| HealthRow {
            id: id.to_string(),
            healthy: if record.healthy { "yes" } else { "no" }.to_string(),
            reason: record.reason.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
    output
}

/// Format scheduler counters
pub fn format_scheduler_status(status: &SchedulerStatus) -> String {
    let stats = &status.stats;
    let rows = vec![
        metric("paused", status.is_paused),
        metric("queued", status.queue_length),
        metric("running", status.running_tasks),
        metric("retrying", status.retrying_tasks),
        metric("in history", status.completed_tasks),
        metric("enqueued", stats.total_enqueued),
        metric("completed", stats.total_completed),
        metric("failed", stats.total_failed),
        metric("cancelled", stats.total_cancelled),
        metric("retries", stats.total_retries),
        metric("avg execution", format_millis(stats.avg_execution_ms)),
        metric("success rate", format!("{:.1}%", stats.success_rate)),
    ];

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format finished tasks as an ASCII table
pub fn format_tasks(tasks: &[TaskRecord]) -> String {
    if tasks.is_empty() {
        return "No finished tasks".to_string();
    }

    #[derive(Tabled)]
    struct TaskRow {
        #[tabled(rename = "TASK")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "RETRIES")]
        retries: u32,
        #[tabled(rename = "TIME")]
        time: String,
        #[tabled(rename = "ERROR")]
        error: String,
    }

    let rows: Vec<TaskRow> = tasks
        .iter()
        .map(|t| TaskRow {
            id: truncate(t.id.as_str(), 24),
            name: t.name.clone(),
            status: t.status.to_string(),
            retries: t.retry_count,
            time: t
                .execution_ms
                .map(|ms| format_millis(ms as f64))
                .unwrap_or_else(|| "-".to_string()),
            error: t.error.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Format a millisecond figure in human-readable form
fn format_millis(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{:.0}ms", ms)
    } else if ms < 60_000.0 {
        format!("{:.1}s", ms / 1000.0)
    } else {
        let secs = (ms / 1000.0) as u64;
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
