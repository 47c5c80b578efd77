//! CLI command definitions

use crate::execution::DEFAULT_MAX_PARALLEL;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Trigger event name
    #[arg(long, env = "FLOWRUN_EVENT", default_value = "push")]
    pub event: String,

    /// Git ref the run is for
    #[arg(long = "ref", env = "FLOWRUN_REF", default_value = "refs/heads/main")]
    pub git_ref: String,

    /// Commit sha
    #[arg(long, env = "FLOWRUN_SHA", default_value = "")]
    pub sha: String,

    /// User that triggered the run
    #[arg(long, env = "FLOWRUN_ACTOR", default_value = "")]
    pub actor: String,

    /// Repository name, e.g. owner/repo
    #[arg(long, env = "FLOWRUN_REPOSITORY", default_value = "")]
    pub repository: String,

    /// Workflow env overrides (KEY=VALUE)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Event inputs (key=value), exposed as `inputs.*`
    #[arg(long, value_parser = parse_key_value)]
    pub input: Vec<(String, String)>,

    /// Maximum number of job instances running at once
    #[arg(long, env = "FLOWRUN_MAX_PARALLEL", default_value_t = DEFAULT_MAX_PARALLEL)]
    pub max_parallel: usize,

    /// Default step timeout in minutes
    #[arg(long, env = "FLOWRUN_TIMEOUT_MINUTES", value_parser = parse_minutes)]
    pub timeout_minutes: Option<Duration>,

    /// Default shell for `run` steps
    #[arg(long, env = "FLOWRUN_SHELL", default_value = "sh")]
    pub shell: String,

    /// Directory steps run in
    #[arg(short = 'C', long)]
    pub working_dir: Option<PathBuf>,

    /// Run even if the workflow's `on` filters reject the event
    #[arg(long)]
    pub force: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a workflow file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the job instances a workflow expands to
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show the full report of one run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// Parse a positive, possibly fractional, number of minutes
pub fn parse_minutes(s: &str) -> Result<Duration, String> {
    let minutes: f64 = s
        .parse()
        .map_err(|_| format!("Invalid number of minutes: {}", s))?;
    if !(minutes.is_finite() && minutes > 0.0) {
        return Err(format!("Minutes must be positive, got {}", s));
    }
    Duration::try_from_secs_f64(minutes * 60.0).map_err(|_| format!("Minutes out of range: {}", s))
}
