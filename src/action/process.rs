//! Workflow-local actions backed by a shell command

use super::{Action, ActionContext, ActionOutput, ActionSpec, InputSpec};
use crate::core::config::ActionConfig;
use crate::core::Shell;
use crate::error::ActionError;
use crate::execution::runner::{run_process, ProcessSpec};
use async_trait::async_trait;
use tracing::debug;

/// Runs a command line with its inputs exported as `INPUT_<NAME>`
#[derive(Debug, Clone)]
pub struct ProcessAction {
    run: String,
    shell: Shell,
    spec: ActionSpec,
}

/// `release-notes` becomes `INPUT_RELEASE_NOTES`
pub fn input_env_name(input: &str) -> String {
    format!("INPUT_{}", input.replace(['-', ' '], "_").to_uppercase())
}

impl ProcessAction {
    pub fn new(run: impl Into<String>, shell: Shell, spec: ActionSpec) -> Self {
        Self {
            run: run.into(),
            shell,
            spec,
        }
    }

    /// Shell names are checked when the workflow loads; unknown ones fall back to `sh`
    pub fn from_config(config: &ActionConfig) -> Self {
        let shell = config
            .shell
            .as_deref()
            .and_then(Shell::parse)
            .unwrap_or_default();
        let spec = ActionSpec {
            description: config.description.clone(),
            inputs: config
                .inputs
                .iter()
                .map(|(name, input)| {
                    (
                        name.clone(),
                        InputSpec {
                            required: input.required,
                            default: input.default.clone(),
                            description: input.description.clone(),
                        },
                    )
                })
                .collect(),
            // Without a declaration every output passes through
            outputs: (!config.outputs.is_empty()).then(|| config.outputs.clone()),
        };
        Self::new(config.run.clone(), shell, spec)
    }
}

#[async_trait]
impl Action for ProcessAction {
    fn spec(&self) -> ActionSpec {
        self.spec.clone()
    }

    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let (program, args) = self.shell.command();
        let mut env = ctx.env.clone();
        env.extend(
            ctx.inputs
                .iter()
                .map(|(name, value)| (input_env_name(name), value.clone())),
        );

        let mut args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        args.push(self.run.clone());
        let spec = ProcessSpec {
            program: program.to_string(),
            args,
            env,
            working_dir: ctx.working_dir.clone(),
        };

        debug!("Running process action via {}", program);
        // The runner bounds the whole action with the step timeout
        let output = run_process(spec, None, &ctx.log)
            .await
            .map_err(|source| ActionError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(ActionOutput {
            exit_code: output.exit_code.unwrap_or(-1),
            outputs: output.outputs,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::InputConfig;
    use crate::execution::sink::{CollectingSink, StepLog};
    use crate::secrets::OutputMasker;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn test_input_env_name() {
        assert_eq!(input_env_name("release-notes"), "INPUT_RELEASE_NOTES");
        assert_eq!(input_env_name("who"), "INPUT_WHO");
    }

    #[tokio::test]
    async fn test_process_action_inputs_and_outputs() {
        let config = ActionConfig {
            description: None,
            run: "echo \"greeting=hello $INPUT_WHO\" >> \"$FLOWRUN_OUTPUT\"; echo \"::set-output name=extra::x\"".to_string(),
            shell: None,
            inputs: BTreeMap::from([(
                "who".to_string(),
                InputConfig {
                    required: true,
                    ..Default::default()
                },
            )]),
            outputs: vec!["greeting".to_string()],
        };
        let action = ProcessAction::from_config(&config);
        assert_eq!(action.spec().outputs, Some(vec!["greeting".to_string()]));

        let sink = Arc::new(CollectingSink::new());
        let ctx = ActionContext {
            inputs: BTreeMap::from([("who".to_string(), "world".to_string())]),
            env: BTreeMap::new(),
            working_dir: std::env::temp_dir(),
            log: StepLog::new(sink, Arc::new(OutputMasker::new()), "job", "greet"),
        };

        let output = action.run(ctx).await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.outputs["greeting"], "hello world");
        // filtering to declared outputs happens in the runner
        assert_eq!(output.outputs["extra"], "x");
    }

    #[test]
    fn test_undeclared_outputs_not_filtered() {
        let config = ActionConfig {
            description: None,
            run: "echo \"::set-output name=msg::hi\"".to_string(),
            shell: None,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
        };
        assert_eq!(ProcessAction::from_config(&config).spec().outputs, None);
    }
}
