//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Workflow runner for CI/CD pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "flowrun")]
#[command(version)]
#[command(about = "Run CI/CD workflows: job graphs, matrix builds, parallel execution", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a workflow
    Run(RunCommand),

    /// Validate a workflow file
    Validate(ValidateCommand),

    /// Show the job instances a workflow expands to
    Plan(PlanCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "flowrun",
            "run",
            "-f",
            "ci.yml",
            "--event",
            "pull_request",
            "--ref",
            "refs/heads/feature",
            "--env",
            "MODE=fast",
            "--input",
            "level=debug",
            "--max-parallel",
            "2",
            "--json",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Command::Run(run) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(run.event, "pull_request");
        assert_eq!(run.git_ref, "refs/heads/feature");
        assert_eq!(run.env, vec![("MODE".to_string(), "fast".to_string())]);
        assert_eq!(run.input, vec![("level".to_string(), "debug".to_string())]);
        assert_eq!(run.max_parallel, 2);
        assert!(run.json);
        assert!(!run.no_history);
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["flowrun", "run", "-f", "ci.yml"]).unwrap();
        let Command::Run(run) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(run.shell, "sh");
        assert!(run.timeout_minutes.is_none());
    }

    #[test]
    fn test_history_and_plan() {
        let cli = Cli::try_parse_from(["flowrun", "history", "--workflow", "CI", "-l", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::History(HistoryCommand { limit: 5, ref workflow, .. }) if workflow.as_deref() == Some("CI")
        ));

        let cli = Cli::try_parse_from(["flowrun", "plan", "-f", "ci.yml", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Plan(PlanCommand { json: true, .. })));
    }

    #[test]
    fn test_timeout_minutes_flag() {
        let cli = Cli::try_parse_from(["flowrun", "run", "-f", "ci.yml", "--timeout-minutes", "2"]).unwrap();
        let Command::Run(run) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(run.timeout_minutes, Some(std::time::Duration::from_secs(120)));

        assert!(Cli::try_parse_from(["flowrun", "run", "-f", "ci.yml", "--timeout-minutes", "1e300"]).is_err());
    }

    #[test]
    fn test_bad_key_value() {
        assert!(Cli::try_parse_from(["flowrun", "run", "-f", "ci.yml", "--env", "NOEQUALS"]).is_err());
    }
}
