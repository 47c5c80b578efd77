//! Built-in actions available to every workflow

use super::{Action, ActionContext, ActionOutput, ActionSpec, InputSpec};
use crate::error::ActionError;
use crate::execution::sink::Stream;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Prints `message` and echoes every input back as an output
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            description: Some("Print a message".to_string()),
            inputs: BTreeMap::from([("message".to_string(), InputSpec::optional(""))]),
            outputs: None,
        }
    }

    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let message = ctx.input("message").unwrap_or_default();
        let stdout = ctx.log.write(Stream::Stdout, message);
        Ok(ActionOutput {
            stdout,
            ..ActionOutput::success(ctx.inputs)
        })
    }
}

/// Turns each input into an output of the same name
#[derive(Debug, Default, Clone, Copy)]
pub struct SetOutputAction;

#[async_trait]
impl Action for SetOutputAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            description: Some("Publish inputs as step outputs".to_string()),
            ..Default::default()
        }
    }

    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        Ok(ActionOutput::success(ctx.inputs))
    }
}

/// Fails with `exit-code` (default 1), printing `message` to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct FailAction;

#[async_trait]
impl Action for FailAction {
    fn spec(&self) -> ActionSpec {
        ActionSpec {
            description: Some("Fail the step".to_string()),
            inputs: BTreeMap::from([
                ("exit-code".to_string(), InputSpec::optional("1")),
                ("message".to_string(), InputSpec::default()),
            ]),
            outputs: Some(Vec::new()),
        }
    }

    async fn run(&self, ctx: ActionContext) -> Result<ActionOutput, ActionError> {
        let raw = ctx.input("exit-code").unwrap_or("1");
        let exit_code: i32 = raw
            .trim()
            .parse()
            .map_err(|_| ActionError::Failed(format!("invalid exit-code '{}'", raw)))?;
        let stderr = ctx
            .input("message")
            .map(|message| ctx.log.write(Stream::Stderr, message))
            .unwrap_or_default();
        Ok(ActionOutput {
            exit_code,
            stderr,
            ..Default::default()
        })
    }
}
