//! Step runner - executes a single step
//!
//! `run` steps go through a shell in a fresh environment; `uses` steps are
//! resolved in the [`ActionRegistry`]. Output is streamed line by line
//! through a redacting [`StepLog`], and outputs are collected from
//! `::set-output` lines and from the file named by `$FLOWRUN_OUTPUT`.

use crate::action::{ActionContext, ActionRegistry};
use crate::core::{ActionRef, EvalScope, Job, Shell, Status, Step, StepAction, StepResult};
use crate::error::{FailureKind, StepFailure};
use crate::execution::sink::{LogSink, StepLog, Stream};
use crate::expression::Template;
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Environment variable naming the step's output file
pub const OUTPUT_FILE_VAR: &str = "FLOWRUN_OUTPUT";

/// Host variables passed through to every step
const INHERITED_ENV: &[&str] = &["PATH", "HOME"];

/// Engine default when neither step nor job sets `timeout-minutes`
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(360 * 60);

/// How long to wait for output readers after a process is killed
const READER_GRACE: Duration = Duration::from_secs(1);

static SET_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^::set-output name=([A-Za-z0-9_.\-]+)::(.*)$").expect("valid set-output pattern")
});

/// A process to launch
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on top of the inherited `PATH` and `HOME`
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
}

/// What a finished (or killed) process produced
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was killed
    pub exit_code: Option<i32>,
    /// Redacted standard output
    pub stdout: String,
    /// Redacted standard error
    pub stderr: String,
    pub outputs: BTreeMap<String, String>,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Parse a `::set-output name=K::V` line
pub fn parse_set_output(line: &str) -> Option<(String, String)> {
    let captures = SET_OUTPUT.captures(line.trim_end_matches('\r'))?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

/// Parse an output file: `K=V` lines and `K<<DELIM` ... `DELIM` blocks
pub fn parse_output_file(content: &str) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        // Whichever delimiter comes first decides the form
        match (line.find("<<"), line.find('=')) {
            (Some(marker), eq) if eq.map_or(true, |eq| marker < eq) => {
                let delimiter = &line[marker + 2..];
                let mut value = Vec::new();
                for body in lines.by_ref() {
                    if body == delimiter {
                        break;
                    }
                    value.push(body);
                }
                outputs.insert(line[..marker].trim().to_string(), value.join("\n"));
            }
            (_, Some(eq)) => {
                let key = line[..eq].trim();
                if !key.is_empty() {
                    outputs.insert(key.to_string(), line[eq + 1..].to_string());
                }
            }
            _ => {}
        }
    }
    outputs
}

/// `PATH` and `HOME` from the host; nothing else leaks into a step
pub fn inherited_env() -> BTreeMap<String, String> {
    INHERITED_ENV
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
        .collect()
}

fn spawn_reader<R>(reader: R, stream: Stream, log: StepLog) -> JoinHandle<(String, Vec<(String, String)>)>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut text = String::new();
        let mut outputs = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if stream == Stream::Stdout {
                if let Some(pair) = parse_set_output(&line) {
                    outputs.push(pair);
                }
            }
            let redacted = log.write(stream, &line);
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&redacted);
        }
        (text, outputs)
    })
}

async fn collect(
    mut handle: JoinHandle<(String, Vec<(String, String)>)>,
    grace: Option<Duration>,
) -> (String, Vec<(String, String)>) {
    match grace {
        None => handle.await.unwrap_or_default(),
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => {
                handle.abort();
                Default::default()
            }
        },
    }
}

/// Temp file backing `$FLOWRUN_OUTPUT`, removed on drop even when the
/// caller abandons `run_process` mid-flight
struct OutputFile(PathBuf);

impl OutputFile {
    async fn create() -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("flowrun-output-{}", Uuid::new_v4()));
        tokio::fs::write(&path, b"").await?;
        Ok(Self(path))
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            debug!("Could not remove {}: {}", self.0.display(), e);
        }
    }
}

/// Launch a process, stream its output and wait for it
///
/// With a timeout, the process is killed when it expires and the result is
/// marked `timed_out`. Errors only cover failing to start the process.
pub async fn run_process(
    spec: ProcessSpec,
    timeout: Option<Duration>,
    log: &StepLog,
) -> std::io::Result<ProcessOutput> {
    let output_file = OutputFile::create().await?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .env_clear()
        .envs(inherited_env())
        .envs(&spec.env)
        .env(OUTPUT_FILE_VAR, &output_file.0)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    let stdout = child
        .stdout
        .take()
        .map(|out| spawn_reader(out, Stream::Stdout, log.clone()));
    let stderr = child
        .stderr
        .take()
        .map(|err| spawn_reader(err, Stream::Stderr, log.clone()));

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait()).await,
        None => Ok(child.wait().await),
    };

    let (exit_code, timed_out) = match waited {
        Ok(Ok(status)) => (status.code(), false),
        Ok(Err(e)) => {
            warn!("Failed waiting for '{}': {}", spec.program, e);
            (None, false)
        }
        Err(_) => {
            debug!("Killing '{}' after timeout", spec.program);
            let _ = child.kill().await;
            (None, true)
        }
    };

    let grace = timed_out.then_some(READER_GRACE);
    let (stdout, mut pairs) = match stdout {
        Some(handle) => collect(handle, grace).await,
        None => Default::default(),
    };
    let (stderr, _) = match stderr {
        Some(handle) => collect(handle, grace).await,
        None => Default::default(),
    };

    let mut outputs: BTreeMap<String, String> = pairs.drain(..).collect();
    match tokio::fs::read_to_string(&output_file.0).await {
        Ok(content) => outputs.extend(parse_output_file(&content)),
        Err(e) => debug!("No output file for '{}': {}", spec.program, e),
    }

    Ok(ProcessOutput {
        exit_code,
        stdout,
        stderr,
        outputs,
        timed_out,
    })
}

/// Runs steps for the executor
pub struct StepRunner {
    actions: Arc<ActionRegistry>,
    sink: Arc<dyn LogSink>,
    working_dir: PathBuf,
    default_timeout: Duration,
    default_shell: Shell,
}

impl StepRunner {
    pub fn new(
        actions: Arc<ActionRegistry>,
        sink: Arc<dyn LogSink>,
        working_dir: PathBuf,
        default_timeout: Duration,
    ) -> Self {
        Self {
            actions,
            sink,
            working_dir,
            default_timeout,
            default_shell: Shell::default(),
        }
    }

    /// Shell for `run` steps that do not name one
    pub fn with_default_shell(mut self, shell: Shell) -> Self {
        self.default_shell = shell;
        self
    }

    /// Step timeout: the step's own, else the job's, else the engine default
    pub fn timeout_for(&self, step: &Step, job: &Job) -> Duration {
        step.timeout.or(job.timeout).unwrap_or(self.default_timeout)
    }

    fn working_dir(&self, dir: Option<&Template>, scope: &EvalScope<'_>) -> PathBuf {
        match dir {
            Some(template) => {
                let rendered = template.render(scope);
                let path = Path::new(&rendered);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.working_dir.join(path)
                }
            }
            None => self.working_dir.clone(),
        }
    }

    /// Execute one step; failures are recorded in the result, never returned
    pub async fn run(
        &self,
        step: &Step,
        job: &Job,
        instance: &str,
        scope: &EvalScope<'_>,
        env: &BTreeMap<String, String>,
    ) -> StepResult {
        let mut result = StepResult::new(step.index, step.id.clone(), step.label());
        result.started_at = Some(Utc::now());

        let log = StepLog::new(
            self.sink.clone(),
            scope.ctx.masker().clone(),
            instance,
            step.label(),
        );
        let timeout = self.timeout_for(step, job);
        let working_dir = self.working_dir(step.working_directory.as_ref(), scope);

        let outcome = match &step.action {
            StepAction::Run(script) => {
                let (program, args) = step.shell.unwrap_or(self.default_shell).command();
                let mut args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                args.push(script.render(scope));
                let spec = ProcessSpec {
                    program: program.to_string(),
                    args,
                    env: env.clone(),
                    working_dir,
                };
                match run_process(spec, Some(timeout), &log).await {
                    Ok(output) => {
                        let failure = if output.timed_out {
                            Some(StepFailure::timeout(timeout))
                        } else if output.exit_code != Some(0) {
                            Some(StepFailure::exit_code(output.exit_code.unwrap_or(-1)))
                        } else {
                            None
                        };
                        StepOutcome::from_output(output, failure)
                    }
                    Err(e) => StepOutcome::failed(StepFailure::new(
                        FailureKind::Spawn,
                        format!("failed to start '{}': {}", program, e),
                    )),
                }
            }
            StepAction::Uses { reference, with } => {
                let inputs = with
                    .iter()
                    .map(|(key, value)| (key.clone(), value.render(scope)))
                    .collect();
                self.run_action(reference, inputs, env, working_dir, timeout, log)
                    .await
            }
        };

        let masker = scope.ctx.masker();
        result.exit_code = outcome.exit_code;
        // Actions may build their output without going through the log
        result.stdout = masker.mask(&outcome.stdout);
        result.stderr = masker.mask(&outcome.stderr);
        result.outputs = outcome.outputs;
        result.outcome = if outcome.failure.is_some() {
            Status::Failure
        } else {
            Status::Success
        };
        result.conclusion = if step.continue_on_error {
            Status::Success
        } else {
            result.outcome
        };
        result.failure = outcome.failure.map(|mut f| {
            f.message = masker.mask(&f.message);
            f
        });
        result.finished_at = Some(Utc::now());
        result
    }

    async fn run_action(
        &self,
        reference: &ActionRef,
        inputs: BTreeMap<String, String>,
        env: &BTreeMap<String, String>,
        working_dir: PathBuf,
        timeout: Duration,
        log: StepLog,
    ) -> StepOutcome {
        let action = match self.actions.resolve(reference) {
            Ok(action) => action,
            Err(e) => return StepOutcome::failed(e.into()),
        };
        let spec = action.spec();
        let inputs = match spec.resolve_inputs(inputs) {
            Ok(inputs) => inputs,
            Err(e) => return StepOutcome::failed(e.into()),
        };

        let context = ActionContext {
            inputs,
            env: env.clone(),
            working_dir,
            log,
        };
        match tokio::time::timeout(timeout, action.run(context)).await {
            Ok(Ok(mut output)) => {
                if let Some(declared) = &spec.outputs {
                    output.outputs.retain(|key, _| declared.contains(key));
                }
                let failure = (output.exit_code != 0).then(|| StepFailure::exit_code(output.exit_code));
                StepOutcome {
                    exit_code: Some(output.exit_code),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    outputs: output.outputs,
                    failure,
                }
            }
            Ok(Err(e)) => StepOutcome::failed(e.into()),
            Err(_) => StepOutcome::failed(StepFailure::timeout(timeout)),
        }
    }
}

struct StepOutcome {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    outputs: BTreeMap<String, String>,
    failure: Option<StepFailure>,
}

impl StepOutcome {
    fn failed(failure: StepFailure) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            outputs: BTreeMap::new(),
            failure: Some(failure),
        }
    }

    fn from_output(output: ProcessOutput, failure: Option<StepFailure>) -> Self {
        Self {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            outputs: output.outputs,
            failure,
        }
    }
}
