pub mod command;
pub mod engine;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod worker;

pub use command::{CommandEngine, CommandEngineFactory};
pub use engine::{
    DEFAULT_MAX_TOKENS, EngineError, EngineFactory, EngineOptions, EngineResult, EngineStream,
    InferenceEngine, InstancePolicy,
};
pub use worker::{FragmentStream, GenerationWorker, WorkerError, WorkerResult};
