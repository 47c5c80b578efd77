//! Workflow configuration from YAML

use crate::core::{Shell, Workflow};
use crate::error::LoadError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Environment block; values may be any YAML scalar
pub type EnvConfig = BTreeMap<String, Value>;

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Trigger filters
    #[serde(default)]
    pub on: TriggerConfig,

    /// Environment shared by every job
    #[serde(default)]
    pub env: EnvConfig,

    /// Workflow-local process actions, callable through `uses`
    #[serde(default)]
    pub actions: BTreeMap<String, ActionConfig>,

    pub jobs: Vec<JobConfig>,
}

/// The `on` block: a single event, a list of events or a map of filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerConfig {
    Single(String),
    List(Vec<String>),
    Map(BTreeMap<String, Option<EventFilterConfig>>),
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig::Map(BTreeMap::new())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventFilterConfig {
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default)]
    pub branches_ignore: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must finish first; a single id or a list
    #[serde(default, deserialize_with = "one_or_many")]
    pub needs: Vec<String>,

    /// Guard expression
    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    #[serde(default)]
    pub env: EnvConfig,

    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    /// Default timeout for this job's steps
    #[serde(default)]
    pub timeout_minutes: Option<f64>,

    /// A failing instance of this job does not fail the run
    #[serde(default)]
    pub continue_on_error: bool,

    /// Job outputs, evaluated when an instance finishes
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,

    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrategyConfig {
    #[serde(default)]
    pub matrix: Mapping,

    /// Cancel sibling instances when one fails
    #[serde(default)]
    pub fail_fast: bool,

    /// Cap on this job's concurrently running instances
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepConfig {
    /// Step identifier, used to reference its outputs
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Action reference, `name` or `name@version`
    #[serde(default)]
    pub uses: Option<String>,

    /// Action inputs
    #[serde(default)]
    pub with: BTreeMap<String, Value>,

    #[serde(default)]
    pub env: EnvConfig,

    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    /// `sh` (default), `bash` or `pwsh`
    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub continue_on_error: bool,

    #[serde(default)]
    pub timeout_minutes: Option<f64>,

    #[serde(default)]
    pub working_directory: Option<String>,
}

/// A workflow-local action that runs an external command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Command line, run through the shell
    pub run: String,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub inputs: BTreeMap<String, InputConfig>,

    /// Declared output names; when present, anything else the command reports is dropped
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

/// Render a YAML scalar the way it would appear in an environment variable
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Label used in errors for a step without an id
pub fn step_label(index: usize, step: &StepConfig) -> String {
    match (&step.id, &step.name) {
        (Some(id), _) => format!("step '{}'", id),
        (None, Some(name)) => format!("step '{}'", name),
        (None, None) => format!("step #{}", index + 1),
    }
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, LoadError> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not need expressions or the job graph
    pub fn validate(&self) -> Result<(), LoadError> {
        let mut seen_jobs = HashSet::new();
        for job in &self.jobs {
            if !seen_jobs.insert(&job.id) {
                return Err(LoadError::DuplicateJob(job.id.clone()));
            }

            let mut seen_steps = HashSet::new();
            for (index, step) in job.steps.iter().enumerate() {
                if let Some(id) = &step.id {
                    if !seen_steps.insert(id) {
                        return Err(LoadError::DuplicateStep {
                            job: job.id.clone(),
                            step: id.clone(),
                        });
                    }
                }

                let invalid = |reason: &str| LoadError::InvalidStep {
                    job: job.id.clone(),
                    step: step_label(index, step),
                    reason: reason.to_string(),
                };
                match (&step.run, &step.uses) {
                    (Some(_), Some(_)) => return Err(invalid("'run' and 'uses' are mutually exclusive")),
                    (None, None) => return Err(invalid("one of 'run' or 'uses' is required")),
                    _ => {}
                }
                if step.run.is_some() && !step.with.is_empty() {
                    return Err(invalid("'with' only applies to 'uses' steps"));
                }
                for (key, value) in step.with.iter().chain(step.env.iter()) {
                    if scalar_to_string(value).is_none() {
                        return Err(invalid(&format!("value of '{}' must be a scalar", key)));
                    }
                }
            }
        }

        for (name, action) in &self.actions {
            if let Some(shell) = &action.shell {
                if Shell::parse(shell).is_none() {
                    return Err(LoadError::InvalidAction {
                        action: name.clone(),
                        reason: format!("unknown shell '{}'", shell),
                    });
                }
            }
        }
        Ok(())
    }

    /// Compile into the immutable workflow model
    pub fn to_workflow(&self) -> Result<Workflow, LoadError> {
        Workflow::from_config(self)
    }
}
