//! Actions invoked by `uses` steps

pub mod builtin;
pub mod process;

use crate::core::config::ActionConfig;
use crate::core::ActionRef;
use crate::error::ActionError;
use crate::execution::sink::StepLog;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

pub use builtin::{EchoAction, FailAction, SetOutputAction};
pub use process::ProcessAction;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSpec {
    pub required: bool,
    pub default: Option<String>,
    pub description: Option<String>,
}

impl InputSpec {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    pub fn optional(default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            ..Default::default()
        }
    }
}

/// Declared interface of an action
#[derive(Debug, Clone, Default)]
pub struct ActionSpec {
    pub description: Option<String>,
    pub inputs: BTreeMap<String, InputSpec>,
    /// When set, outputs not listed here are dropped
    pub outputs: Option<Vec<String>>,
}

impl ActionSpec {
    /// Fill in defaults and check required inputs
    ///
    /// Inputs the action does not declare are passed through unchanged.
    pub fn resolve_inputs(
        &self,
        mut provided: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ActionError> {
        for (name, input) in &self.inputs {
            if provided.contains_key(name) {
                continue;
            }
            match &input.default {
                Some(default) => {
                    provided.insert(name.clone(), default.clone());
                }
                None if input.required => return Err(ActionError::MissingInput(name.clone())),
                None => {}
            }
        }
        Ok(provided)
    }
}

/// Everything an action sees when it runs
#[derive(Debug)]
pub struct ActionContext {
    pub inputs: BTreeMap<String, String>,
    /// Merged workflow, job and step environment
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    /// Redacting output stream for this step
    pub log: StepLog,
}

impl ActionContext {
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    pub exit_code: i32,
    pub outputs: BTreeMap<String, String>,
    pub stdout: String,
    pub stderr: String,
}

impl ActionOutput {
    pub fn success(outputs: BTreeMap<String, String>) -> Self {
        Self {
            outputs,
            ..Default::default()
        }
    }
}

/// Trait for step actions - allows built-in and process-backed implementations
#[async_trait]
pub trait Action: Send + Sync {
    fn spec(&self) -> ActionSpec;

    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError>;
}

/// Lookup table from action reference to implementation
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `echo`, `set-output` and `fail`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Arc::new(EchoAction));
        registry.register("set-output", Arc::new(SetOutputAction));
        registry.register("fail", Arc::new(FailAction));
        registry
    }

    /// Register under a plain name or a `name@version` key
    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn Action>) {
        self.actions.insert(name.into(), action);
    }

    /// Register the `actions:` section of a workflow
    pub fn register_workflow_actions(&mut self, actions: &BTreeMap<String, ActionConfig>) {
        for (name, config) in actions {
            self.register(name.clone(), Arc::new(ProcessAction::from_config(config)));
        }
    }

    /// Exact `name@version` match first, then the bare name
    pub fn resolve(&self, reference: &ActionRef) -> Result<Arc<dyn Action>, ActionError> {
        self.actions
            .get(&reference.to_string())
            .or_else(|| self.actions.get(&reference.name))
            .cloned()
            .ok_or_else(|| ActionError::Unknown(reference.to_string()))
    }

    pub fn contains(&self, reference: &ActionRef) -> bool {
        self.resolve(reference).is_ok()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
