//! Workflow domain model
//!
//! A [`Workflow`] is compiled once from [`WorkflowConfig`]: every expression
//! is parsed, every matrix is checked and the job graph is built. It is
//! immutable afterwards.

use crate::core::config::{
    scalar_to_string, step_label, ActionConfig, EnvConfig, JobConfig, StepConfig, TriggerConfig,
    WorkflowConfig,
};
use crate::core::context::TriggerEvent;
use crate::core::graph::DependencyGraph;
use crate::core::matrix::Matrix;
use crate::error::LoadError;
use crate::expression::{parse_condition, Expr, Template};
use glob_match::glob_match;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment entries whose values may contain `${{ }}` markers
pub type EnvTemplates = BTreeMap<String, Template>;

#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub triggers: Triggers,
    pub env: EnvTemplates,
    pub actions: BTreeMap<String, ActionConfig>,
    /// Jobs in declaration order
    pub jobs: Vec<Job>,
    pub graph: DependencyGraph,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub name: Option<String>,
    pub needs: Vec<String>,
    pub condition: Option<Condition>,
    pub env: EnvTemplates,
    pub matrix: Matrix,
    pub fail_fast: bool,
    pub max_parallel: Option<usize>,
    pub timeout: Option<Duration>,
    pub continue_on_error: bool,
    pub outputs: BTreeMap<String, Template>,
    pub steps: Vec<Step>,
}

/// A parsed `if:` guard
#[derive(Debug, Clone)]
pub struct Condition {
    pub source: String,
    pub expr: Expr,
}

impl Condition {
    /// Guards calling a status function replace the implicit `success()` policy
    pub fn overrides_status(&self) -> bool {
        self.expr.has_status_check()
    }
}

#[derive(Debug, Clone)]
pub struct Step {
    /// Position within the job
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub action: StepAction,
    pub env: EnvTemplates,
    pub condition: Option<Condition>,
    /// `None` uses the engine's default shell
    pub shell: Option<Shell>,
    pub continue_on_error: bool,
    pub timeout: Option<Duration>,
    pub working_directory: Option<Template>,
}

#[derive(Debug, Clone)]
pub enum StepAction {
    Run(Template),
    Uses {
        reference: ActionRef,
        with: BTreeMap<String, Template>,
    },
}

impl Step {
    /// Key the step's outputs are published under
    pub fn key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("#{}", self.index + 1),
        }
    }

    /// Human-readable label for logs and reports
    pub fn label(&self) -> String {
        match (&self.name, &self.id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => id.clone(),
            (None, None) => match &self.action {
                StepAction::Uses { reference, .. } => format!("uses {}", reference),
                StepAction::Run(_) => format!("step {}", self.index + 1),
            },
        }
    }
}

/// `name` or `name@version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    pub name: String,
    pub version: Option<String>,
}

impl ActionRef {
    pub fn parse(reference: &str) -> Self {
        match reference.split_once('@') {
            Some((name, version)) => Self {
                name: name.trim().to_string(),
                version: Some(version.trim().to_string()),
            },
            None => Self {
                name: reference.trim().to_string(),
                version: None,
            },
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shell {
    #[default]
    Sh,
    Bash,
    Pwsh,
}

impl Shell {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sh" => Some(Shell::Sh),
            "bash" => Some(Shell::Bash),
            "pwsh" => Some(Shell::Pwsh),
            _ => None,
        }
    }

    /// Program and leading arguments; the script is appended last
    pub fn command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Sh => ("sh", &["-e", "-c"]),
            Shell::Bash => ("bash", &["--noprofile", "--norc", "-e", "-c"]),
            Shell::Pwsh => ("pwsh", &["-NoLogo", "-NoProfile", "-Command"]),
        }
    }
}

/// Compiled `on` block; no events means every event triggers the workflow
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    pub events: BTreeMap<String, EventFilter>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub branches: Vec<String>,
    pub branches_ignore: Vec<String>,
    pub tags: Vec<String>,
}

impl EventFilter {
    fn accepts(&self, event: &TriggerEvent) -> bool {
        let has_branch_filter = !self.branches.is_empty() || !self.branches_ignore.is_empty();
        if !has_branch_filter && self.tags.is_empty() {
            return true;
        }

        if let Some(branch) = event.branch() {
            if !has_branch_filter {
                return false;
            }
            let included = self.branches.is_empty()
                || self.branches.iter().any(|p| glob_match(p, branch));
            let ignored = self.branches_ignore.iter().any(|p| glob_match(p, branch));
            return included && !ignored;
        }

        if let Some(tag) = event.tag() {
            return !self.tags.is_empty() && self.tags.iter().any(|p| glob_match(p, tag));
        }

        false
    }
}

impl Triggers {
    fn from_config(config: &TriggerConfig) -> Self {
        let events = match config {
            TriggerConfig::Single(event) => {
                BTreeMap::from([(event.clone(), EventFilter::default())])
            }
            TriggerConfig::List(events) => events
                .iter()
                .map(|e| (e.clone(), EventFilter::default()))
                .collect(),
            TriggerConfig::Map(events) => events
                .iter()
                .map(|(name, filter)| {
                    let filter = filter.clone().unwrap_or_default();
                    (
                        name.clone(),
                        EventFilter {
                            branches: filter.branches,
                            branches_ignore: filter.branches_ignore,
                            tags: filter.tags,
                        },
                    )
                })
                .collect(),
        };
        Self { events }
    }

    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        if self.events.is_empty() {
            return true;
        }
        self.events
            .get(&event.event_name)
            .is_some_and(|filter| filter.accepts(event))
    }
}

impl Workflow {
    /// Load and compile a workflow file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        WorkflowConfig::from_file(path)?.to_workflow()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, LoadError> {
        WorkflowConfig::from_yaml(yaml)?.to_workflow()
    }

    pub fn from_config(config: &WorkflowConfig) -> Result<Self, LoadError> {
        config.validate()?;

        let graph = DependencyGraph::build(
            config
                .jobs
                .iter()
                .map(|job| (job.id.as_str(), job.needs.as_slice())),
        )?;

        let jobs = config
            .jobs
            .iter()
            .map(compile_job)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: config.name.clone(),
            triggers: Triggers::from_config(&config.on),
            env: compile_env("workflow env", &config.env)?,
            actions: config.actions.clone(),
            jobs,
            graph,
        })
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.graph.position(id).map(|i| &self.jobs[i])
    }

    /// Whether the `on` filters accept this event
    pub fn is_triggered_by(&self, event: &TriggerEvent) -> bool {
        self.triggers.accepts(event)
    }
}

fn template(location: impl Into<String>, text: &str) -> Result<Template, LoadError> {
    Template::parse(text).map_err(|e| LoadError::expression(location, e))
}

fn condition(location: impl Into<String>, text: &Option<String>) -> Result<Option<Condition>, LoadError> {
    text.as_ref()
        .map(|source| {
            parse_condition(source)
                .map(|expr| Condition {
                    source: source.clone(),
                    expr,
                })
                .map_err(|e| LoadError::expression(location, e))
        })
        .transpose()
}

fn compile_env(location: &str, env: &EnvConfig) -> Result<EnvTemplates, LoadError> {
    env.iter()
        .map(|(key, value)| {
            let text = scalar_to_string(value).unwrap_or_default();
            Ok((key.clone(), template(format!("{} '{}'", location, key), &text)?))
        })
        .collect()
}

fn minutes(value: Option<f64>) -> Result<Option<Duration>, String> {
    value
        .map(|m| {
            if !(m.is_finite() && m > 0.0) {
                return Err(format!("timeout-minutes must be positive, got {}", m));
            }
            Duration::try_from_secs_f64(m * 60.0)
                .map_err(|_| format!("timeout-minutes {} is out of range", m))
        })
        .transpose()
}

fn compile_job(config: &JobConfig) -> Result<Job, LoadError> {
    let at = |what: &str| format!("job '{}' {}", config.id, what);
    let strategy = config.strategy.clone().unwrap_or_default();

    let matrix = Matrix::from_yaml(&strategy.matrix).map_err(|reason| LoadError::Matrix {
        job: config.id.clone(),
        reason,
    })?;
    if strategy.max_parallel == Some(0) {
        return Err(LoadError::InvalidJob {
            job: config.id.clone(),
            reason: "max-parallel must be at least 1".to_string(),
        });
    }
    let timeout = minutes(config.timeout_minutes).map_err(|reason| LoadError::InvalidJob {
        job: config.id.clone(),
        reason,
    })?;

    let outputs = config
        .outputs
        .iter()
        .map(|(key, text)| Ok((key.clone(), template(at(&format!("output '{}'", key)), text)?)))
        .collect::<Result<BTreeMap<_, _>, LoadError>>()?;

    let steps = config
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| compile_step(&config.id, index, step))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Job {
        id: config.id.clone(),
        name: config.name.clone(),
        needs: config.needs.clone(),
        condition: condition(at("if"), &config.condition)?,
        env: compile_env(&at("env"), &config.env)?,
        matrix,
        fail_fast: strategy.fail_fast,
        max_parallel: strategy.max_parallel,
        timeout,
        continue_on_error: config.continue_on_error,
        outputs,
        steps,
    })
}

fn compile_step(job: &str, index: usize, config: &StepConfig) -> Result<Step, LoadError> {
    let label = step_label(index, config);
    let at = |what: &str| format!("job '{}' {} {}", job, label, what);
    let invalid = |reason: String| LoadError::InvalidStep {
        job: job.to_string(),
        step: label.clone(),
        reason,
    };

    let shell = config
        .shell
        .as_deref()
        .map(|name| Shell::parse(name).ok_or_else(|| invalid(format!("unknown shell '{}'", name))))
        .transpose()?;

    let action = match (&config.run, &config.uses) {
        (Some(run), None) => StepAction::Run(template(at("run"), run)?),
        (None, Some(uses)) => {
            let reference = ActionRef::parse(uses);
            if reference.name.is_empty() {
                return Err(invalid("empty action reference".to_string()));
            }
            let with = config
                .with
                .iter()
                .map(|(key, value)| {
                    let text = scalar_to_string(value).unwrap_or_default();
                    Ok((key.clone(), template(at(&format!("input '{}'", key)), &text)?))
                })
                .collect::<Result<BTreeMap<_, _>, LoadError>>()?;
            StepAction::Uses { reference, with }
        }
        _ => return Err(invalid("exactly one of 'run' or 'uses' is required".to_string())),
    };

    Ok(Step {
        index,
        id: config.id.clone(),
        name: config.name.clone(),
        action,
        env: compile_env(&at("env"), &config.env)?,
        condition: condition(at("if"), &config.condition)?,
        shell,
        continue_on_error: config.continue_on_error,
        timeout: minutes(config.timeout_minutes).map_err(invalid)?,
        working_directory: config
            .working_directory
            .as_deref()
            .map(|dir| template(at("working-directory"), dir))
            .transpose()?,
    })
}
