use std::path::PathBuf;

use futures::stream::LocalBoxStream;
use snafu::Snafu;

pub type EngineResult<T> = Result<T, EngineError>;

/// Ordered text fragments produced by one generation.
pub type EngineStream<'a> = LocalBoxStream<'a, EngineResult<String>>;

pub const DEFAULT_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstancePolicy {
    /// Build a new engine instance for every request.
    #[default]
    Fresh,
    /// Keep one instance while the options are unchanged and reset it between requests.
    Reuse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub model_path: PathBuf,
    pub max_tokens: u32,
    pub instance_policy: InstancePolicy,
}

impl EngineOptions {
    pub fn new(model_path: impl Into<PathBuf>, max_tokens: u32) -> Self {
        Self {
            model_path: model_path.into(),
            max_tokens,
            instance_policy: InstancePolicy::default(),
        }
    }

    pub fn with_instance_policy(mut self, instance_policy: InstancePolicy) -> Self {
        self.instance_policy = instance_policy;
        self
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("model artifact not found at {path}"))]
    MissingModel { stage: &'static str, path: String },
    #[snafu(display("no inference program is configured"))]
    MissingProgram { stage: &'static str },
    #[snafu(display("inference program '{program}' not found: {source}"))]
    ProgramNotFound {
        stage: &'static str,
        program: String,
        source: which::Error,
    },
    #[snafu(display("failed to start inference program '{program}': {source}"))]
    Spawn {
        stage: &'static str,
        program: String,
        source: std::io::Error,
    },
    #[snafu(display("inference io failed at {stage}: {source}"))]
    Io {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("inference program exited with {status}: {stderr}"))]
    ExitStatus {
        stage: &'static str,
        status: String,
        stderr: String,
    },
    #[snafu(display("{message}"))]
    Failed {
        stage: &'static str,
        message: String,
    },
}

impl EngineError {
    /// True when the configured program cannot be started at all.
    pub fn is_missing_program(&self) -> bool {
        match self {
            Self::MissingProgram { .. } | Self::ProgramNotFound { .. } => true,
            Self::Spawn { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// A loaded model able to turn one prompt into a fragment stream.
///
/// Instances are single-owner and non-reentrant: the `&mut self` receiver keeps
/// a second generation from starting while a stream is still borrowed.
pub trait InferenceEngine {
    fn generate<'a>(&'a mut self, prompt: &'a str) -> EngineStream<'a>;

    /// Clears per-conversation state before a reused instance serves another request.
    fn reset(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

pub trait EngineFactory: Send + Sync {
    fn create(&self, options: &EngineOptions) -> EngineResult<Box<dyn InferenceEngine>>;
}
