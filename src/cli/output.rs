//! CLI output formatting

use crate::{
    core::{ExecutionPlan, JobResult, RunReport, RunStatus, Status},
    execution::{ExecutionEvent, LogSink, Stream},
    persistence::RunSummary,
};
use console::Emoji;
use serde_json::json;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Prints step output to the terminal, prefixed with its instance and step
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn line(&self, instance: &str, step: &str, stream: Stream, line: &str) {
        let prefix = format!("[{} / {}]", instance, step);
        match stream {
            Stream::Stdout => println!("{} {}", style(prefix).dim(), line),
            Stream::Stderr => eprintln!("{} {}", style(prefix).yellow().dim(), line),
        }
    }
}

/// Format an instance or step status for display
pub fn format_status(status: Status) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        Status::Pending | Status::Blocked | Status::Ready => style(label).dim().to_string(),
        Status::Running => style(label).yellow().to_string(),
        Status::Success => style(label).green().to_string(),
        Status::Failure => style(label).red().to_string(),
        Status::Skipped => style(label).dim().to_string(),
        Status::Cancelled => style(label).yellow().to_string(),
    }
}

/// Format a run status for display
pub fn format_run_status(status: RunStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        RunStatus::Running => style(label).yellow().to_string(),
        RunStatus::Success => style(label).green().to_string(),
        RunStatus::Failure => style(label).red().to_string(),
        RunStatus::Cancelled => style(label).yellow().to_string(),
    }
}

fn status_icon(status: Status) -> Emoji<'static, 'static> {
    match status {
        Status::Success => CHECK,
        Status::Failure => CROSS,
        Status::Skipped => SKIP,
        Status::Cancelled => WARN,
        Status::Running => SPINNER,
        _ => INFO,
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format an execution event for display
///
/// Returns `None` for events that are too noisy for the console.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            workflow,
            instances,
        } => Some(format!(
            "{} Starting workflow {} ({}, {} job instances)",
            ROCKET,
            style(workflow).bold(),
            style(short_id(run_id)).dim(),
            instances
        )),
        ExecutionEvent::InstanceStatusChanged {
            instance,
            status,
            reason,
        } => match status {
            Status::Running => Some(format!("{} {}", SPINNER, style(instance).cyan())),
            Status::Success | Status::Failure | Status::Skipped | Status::Cancelled => {
                let mut line = format!(
                    "{} {} {}",
                    status_icon(*status),
                    style(instance).bold(),
                    format_status(*status)
                );
                if let Some(reason) = reason {
                    line.push_str(&format!(" {}", style(format!("({})", reason)).dim()));
                }
                Some(line)
            }
            _ => None,
        },
        ExecutionEvent::StepStarted { instance, step } => Some(format!(
            "  {} {} {}",
            style("▸").dim(),
            style(instance).dim(),
            style(step).cyan()
        )),
        ExecutionEvent::StepFinished {
            instance,
            step,
            outcome,
            conclusion,
        } => {
            let mut line = format!(
                "  {}{} {}",
                status_icon(*conclusion),
                style(instance).dim(),
                step
            );
            if outcome != conclusion {
                line.push_str(&format!(
                    " {}",
                    style(format!("({} ignored)", outcome)).yellow()
                ));
            }
            Some(line)
        }
        ExecutionEvent::RunFinished { run_id, status } => Some(format!(
            "{} Run ({}) {}",
            INFO,
            style(short_id(run_id)).dim(),
            format_run_status(*status)
        )),
    }
}

/// Human-readable duration, e.g. `850ms`, `12.4s`, `3m 05s`
pub fn format_duration(duration: chrono::Duration) -> String {
    let millis = duration.num_milliseconds().max(0);
    if millis < 1_000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1_000.0)
    } else {
        let secs = millis / 1_000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Lines of a failed step's output shown in the report
const FAILED_OUTPUT_LINES: usize = 10;

fn format_job(job: &JobResult) -> Vec<String> {
    let mut lines = vec![format!(
        "{}{} {}",
        status_icon(job.status),
        style(&job.instance).bold(),
        format_status(job.status)
    )];
    if let Some(reason) = &job.reason {
        lines.push(format!("    {}", style(reason).dim()));
    }
    for step in &job.steps {
        let mut line = format!("    {}{}", status_icon(step.conclusion), step.name);
        if let Some(failure) = &step.failure {
            line.push_str(&format!(" {}", style(format!("- {}", failure.message)).red()));
        }
        lines.push(line);
        if step.outcome == Status::Failure {
            let output = if step.stderr.trim().is_empty() {
                &step.stdout
            } else {
                &step.stderr
            };
            if !output.trim().is_empty() {
                for text in format_output(output, FAILED_OUTPUT_LINES).lines() {
                    lines.push(format!("      {}", style(text).dim()));
                }
            }
        }
    }
    for (key, value) in &job.outputs {
        lines.push(format!("    {} {} = {}", style("output").dim(), key, value));
    }
    lines
}

/// Multi-line summary of a finished run
pub fn format_report(report: &RunReport) -> String {
    let mut lines = vec![format!(
        "{} {} - {}",
        style(&report.workflow).bold(),
        style(short_id(&report.run_id)).dim(),
        format_run_status(report.status)
    )];

    for job in &report.jobs {
        lines.extend(format_job(job));
    }

    let counts = report.counts();
    let tally: Vec<String> = counts
        .iter()
        .map(|(status, n)| format!("{} {}", n, status))
        .collect();
    let duration = report
        .duration()
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());
    lines.push(format!(
        "{} {} in {}",
        INFO,
        tally.join(", "),
        duration
    ));

    lines.join("\n")
}

/// Format one history entry
pub fn format_run_summary(summary: &RunSummary) -> String {
    let icon = match summary.status {
        RunStatus::Success => CHECK,
        RunStatus::Failure => CROSS,
        RunStatus::Cancelled => WARN,
        RunStatus::Running => SPINNER,
    };
    let duration = summary
        .finished_at
        .map(|end| format_duration(end - summary.started_at))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}{} - {} - {} - {} ({}/{} succeeded) - {}",
        icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.workflow).bold(),
        summary.started_at.format("%Y-%m-%d %H:%M:%S"),
        format_run_status(summary.status),
        summary.succeeded,
        summary.instances,
        style(duration).cyan()
    )
}

/// Instance listing for `flowrun plan`
pub fn format_plan(plan: &ExecutionPlan) -> String {
    let mut lines = vec![format!(
        "{} {} job instances",
        style(&plan.workflow.name).bold(),
        plan.len()
    )];
    for layer in plan.workflow.graph.layers() {
        for job in layer {
            for &i in plan.instances_of(job) {
                let instance = &plan.instances[i];
                let needs: Vec<&str> = instance
                    .predecessors
                    .iter()
                    .map(|&p| plan.instances[p].id.as_str())
                    .collect();
                if needs.is_empty() {
                    lines.push(format!("  {}", style(&instance.id).cyan()));
                } else {
                    lines.push(format!(
                        "  {} {} {}",
                        style(&instance.id).cyan(),
                        style("<-").dim(),
                        needs.join(", ")
                    ));
                }
            }
        }
    }
    lines.join("\n")
}

/// JSON form of the plan
pub fn plan_json(plan: &ExecutionPlan) -> serde_json::Value {
    let instances: Vec<serde_json::Value> = plan
        .instances
        .iter()
        .map(|instance| {
            json!({
                "id": instance.id,
                "job": plan.workflow.jobs[instance.job].id,
                "matrix": instance.matrix,
                "needs": instance
                    .predecessors
                    .iter()
                    .map(|&p| plan.instances[p].id.clone())
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "workflow": plan.workflow.name,
        "layers": plan.workflow.graph.layers(),
        "instances": instances,
    })
}

/// Format step output with truncation
fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
