//! Log sinks for step output
//!
//! Every line a step prints passes through a [`StepLog`], which redacts it
//! before handing it to the configured [`LogSink`].

use crate::secrets::OutputMasker;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Destination for redacted step output
pub trait LogSink: Send + Sync {
    fn line(&self, instance: &str, step: &str, stream: Stream, line: &str);
}

/// Emits each line as a tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn line(&self, instance: &str, step: &str, stream: Stream, line: &str) {
        info!(target: "flowrun::output", instance, step, %stream, "{}", line);
    }
}

/// Discards output
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn line(&self, _instance: &str, _step: &str, _stream: Stream, _line: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub instance: String,
    pub step: String,
    pub stream: Stream,
    pub text: String,
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<LogLine>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    /// Concatenated text of every collected line
    pub fn text(&self) -> String {
        self.lines
            .lock()
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl LogSink for CollectingSink {
    fn line(&self, instance: &str, step: &str, stream: Stream, line: &str) {
        self.lines.lock().push(LogLine {
            instance: instance.to_string(),
            step: step.to_string(),
            stream,
            text: line.to_string(),
        });
    }
}

/// Redacting writer bound to one step of one instance
#[derive(Clone)]
pub struct StepLog {
    sink: Arc<dyn LogSink>,
    masker: Arc<OutputMasker>,
    instance: String,
    step: String,
}

impl StepLog {
    pub fn new(
        sink: Arc<dyn LogSink>,
        masker: Arc<OutputMasker>,
        instance: impl Into<String>,
        step: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            masker,
            instance: instance.into(),
            step: step.into(),
        }
    }

    /// Redact and forward a line, returning the redacted text
    pub fn write(&self, stream: Stream, line: &str) -> String {
        let redacted = self.masker.mask(line);
        self.sink.line(&self.instance, &self.step, stream, &redacted);
        redacted
    }

    pub fn masker(&self) -> &OutputMasker {
        &self.masker
    }
}

impl fmt::Debug for StepLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepLog")
            .field("instance", &self.instance)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}
