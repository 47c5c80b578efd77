//! Execution layer: scheduling, job execution and step running

pub mod engine;
pub mod executor;
pub mod runner;
pub mod scheduler;
pub mod sink;

pub use engine::{
    EngineConfig, EventEmitter, EventHandler, ExecutionEngine, ExecutionEvent, DEFAULT_MAX_PARALLEL,
};
pub use executor::JobExecutor;
pub use runner::{StepRunner, DEFAULT_STEP_TIMEOUT};
pub use scheduler::{Admission, ExecutionScheduler};
pub use sink::{CollectingSink, LogSink, NullSink, StepLog, Stream, TracingSink};
