//! CLI output formatting

use crate::{
    core::{ExecutionStatus, JobInstance, JobStatus, StepOutcome},
    execution::{ExecutionEvent, RunReport},
    persistence::RunSummary,
    MatchKind,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "* ");

/// Progress bar over finished job instances
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a job instance status for display
pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Pending => style("PENDING").dim().to_string(),
        JobStatus::Running => style("RUNNING").yellow().to_string(),
        JobStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        JobStatus::Failed => style("FAILED").red().to_string(),
        JobStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        JobStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

fn status_icon(status: JobStatus) -> Emoji<'static, 'static> {
    match status {
        JobStatus::Succeeded => CHECK,
        JobStatus::Failed => CROSS,
        JobStatus::Cancelled => WARN,
        JobStatus::Skipped => SKIP,
        JobStatus::Pending | JobStatus::Running => SPINNER,
    }
}

/// Format an execution event for display; `None` for events not worth a line
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted { run_id, pipelines, instances } => format!(
            "{} Starting {} ({} job instances, run {})",
            ROCKET,
            style(pipelines.join(", ")).bold(),
            instances,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::JobStarted { instance, .. } => {
            format!("{} {}", SPINNER, style(instance).cyan())
        }
        ExecutionEvent::JobSkipped { instance, reason } => {
            format!("{} {} {}", SKIP, style(instance).dim(), style(reason).dim())
        }
        ExecutionEvent::StepStarted { .. } => return None,
        ExecutionEvent::StepSkipped { instance, step, reason } => format!(
            "   {} {} / {} ({})",
            SKIP,
            style(instance).dim(),
            step,
            style(reason).dim()
        ),
        ExecutionEvent::StepFinished { instance, step, outcome } => match outcome {
            StepOutcome::Succeeded { .. } => format!("   {} {} / {}", CHECK, style(instance).dim(), step),
            StepOutcome::Failed { failure, continued } => format!(
                "   {} {} / {}: {}{}",
                CROSS,
                style(instance).dim(),
                style(step).red(),
                style(failure).dim(),
                if *continued { " (continuing)" } else { "" }
            ),
            StepOutcome::Skipped { .. } => return None,
        },
        ExecutionEvent::CacheRestored { instance, key, matched_key, kind } => {
            let detail = match (kind, matched_key) {
                (MatchKind::Exact, _) => style("hit").green().to_string(),
                (MatchKind::Prefix, Some(matched)) => format!("{} {}", style("partial hit").yellow(), matched),
                _ => style("miss").dim().to_string(),
            };
            format!("   {} {} cache {}: {}", INFO, style(instance).dim(), key, detail)
        }
        ExecutionEvent::CacheSaved { instance, key, files } => format!(
            "   {} {} saved cache {} ({} files)",
            INFO,
            style(instance).dim(),
            key,
            files
        ),
        ExecutionEvent::ArtifactPublished { instance, artifact, files } => format!(
            "   {} {} published {} ({} files)",
            PACKAGE,
            style(instance).dim(),
            style(artifact).bold(),
            files
        ),
        ExecutionEvent::JobCancelled { instance, reason } => {
            format!("{} {} cancelled: {}", WARN, style(instance).yellow(), reason)
        }
        ExecutionEvent::JobFinished { instance, status, failure } => match failure {
            Some(failure) => format!(
                "{} {} {}: {}",
                status_icon(*status),
                style(instance).bold(),
                format_job_status(*status),
                style(failure).red()
            ),
            None => format!("{} {} {}", status_icon(*status), style(instance).bold(), format_job_status(*status)),
        },
        ExecutionEvent::RunCompleted { run_id, status } => format!(
            "{} Run {} {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

/// One line per instance plus totals
pub fn format_run_report(report: &RunReport) -> String {
    let mut out = String::new();
    for instance in &report.instances {
        out.push_str(&format_instance_line(instance));
        out.push('\n');
    }
    let state = &report.state;
    out.push_str(&format!(
        "{} {} succeeded, {} failed, {} cancelled, {} skipped",
        format_status(state.status),
        style(state.succeeded).green(),
        style(state.failed).red(),
        style(state.cancelled).yellow(),
        style(state.skipped).dim()
    ));
    out
}

fn format_instance_line(instance: &JobInstance) -> String {
    let detail = instance
        .failure
        .as_ref()
        .map(|f| f.to_string())
        .or_else(|| instance.skip_reason.clone())
        .unwrap_or_default();
    format!(
        "  {} {:<40} {} {}",
        status_icon(instance.status),
        format!("{}/{}", instance.pipeline, instance.id),
        format_job_status(instance.status),
        style(detail).dim()
    )
}

/// Format a run summary for history listings
pub fn format_run_summary(summary: &RunSummary) -> String {
    let icon = match summary.status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        _ => SPINNER,
    };
    let duration = summary
        .completed_at
        .and_then(|done| done.signed_duration_since(summary.started_at).to_std().ok())
        .map(format_duration)
        .unwrap_or_default();

    format!(
        "{} {} - {} - {} ({}/{} ok) {} {}",
        icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(summary.pipelines.join(", ")).bold(),
        format_status(summary.status),
        summary.succeeded + summary.skipped,
        summary.total_instances,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        style(duration).dim()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format command output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            tail
        )
    }
}
