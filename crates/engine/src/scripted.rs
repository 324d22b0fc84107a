//! Deterministic engine that replays a fixed script of fragments, pauses and
//! failures. Used to exercise the worker and its callers without a model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream;
use snafu::ensure;
use tokio::sync::Notify;

use super::engine::{
    EngineError, EngineFactory, EngineOptions, EngineResult, EngineStream, FailedSnafu,
    InferenceEngine,
};

const WAIT_POLL: Duration = Duration::from_millis(5);
const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Fragment(String),
    Delay(Duration),
    /// Blocks until the notify is signalled.
    Gate(Arc<Notify>),
    Fail(String),
}

impl ScriptStep {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self::Fragment(text.into())
    }

    pub fn delay(duration: Duration) -> Self {
        Self::Delay(duration)
    }

    pub fn gate(gate: &Arc<Notify>) -> Self {
        Self::Gate(Arc::clone(gate))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

#[derive(Debug, Default)]
struct CounterState {
    instances_created: AtomicUsize,
    resets: AtomicUsize,
    active: AtomicUsize,
    max_concurrent: AtomicUsize,
    fragments_pulled: AtomicUsize,
    generations_ended: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

/// Shared observation point for every instance a [`ScriptedFactory`] creates.
#[derive(Debug, Clone, Default)]
pub struct ScriptCounters(Arc<CounterState>);

impl ScriptCounters {
    pub fn instances_created(&self) -> usize {
        self.0.instances_created.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.0.resets.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.0.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn fragments_pulled(&self) -> usize {
        self.0.fragments_pulled.load(Ordering::SeqCst)
    }

    /// Generations whose fragment stream has been dropped, for any reason.
    pub fn generations_ended(&self) -> usize {
        self.0.generations_ended.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.0
            .prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Polls until `count` generations have ended or a few seconds pass.
    pub async fn wait_for_ended(&self, count: usize) {
        let mut waited = Duration::ZERO;
        while self.generations_ended() < count && waited < WAIT_LIMIT {
            tokio::time::sleep(WAIT_POLL).await;
            waited += WAIT_POLL;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedFactory {
    steps: Vec<ScriptStep>,
    counters: ScriptCounters,
    fail_creation: bool,
}

impl ScriptedFactory {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            counters: ScriptCounters::default(),
            fail_creation: false,
        }
    }

    pub fn failing_creation(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    pub fn counters(&self) -> ScriptCounters {
        self.counters.clone()
    }
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, options: &EngineOptions) -> EngineResult<Box<dyn InferenceEngine>> {
        ensure!(
            !self.fail_creation,
            FailedSnafu {
                stage: "scripted-create",
                message: format!(
                    "scripted engine refused to load {}",
                    options.model_path.display()
                ),
            }
        );

        self.counters.0.instances_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            steps: self.steps.clone(),
            counters: self.counters.clone(),
        }))
    }
}

pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    counters: ScriptCounters,
}

impl InferenceEngine for ScriptedEngine {
    fn generate<'a>(&'a mut self, prompt: &'a str) -> EngineStream<'a> {
        self.counters
            .0
            .prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());

        let run = ScriptRun {
            steps: self.steps.iter().cloned().collect(),
            guard: ActiveGuard::enter(self.counters.clone()),
            failed: false,
        };
        Box::pin(stream::unfold(run, |mut run| async move {
            let item = run.next_item().await?;
            Some((item, run))
        }))
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.counters.0.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptRun {
    steps: VecDeque<ScriptStep>,
    guard: ActiveGuard,
    failed: bool,
}

impl ScriptRun {
    async fn next_item(&mut self) -> Option<EngineResult<String>> {
        if self.failed {
            return None;
        }

        loop {
            match self.steps.pop_front()? {
                ScriptStep::Delay(duration) => tokio::time::sleep(duration).await,
                ScriptStep::Gate(gate) => gate.notified().await,
                ScriptStep::Fragment(text) => {
                    self.guard
                        .counters
                        .0
                        .fragments_pulled
                        .fetch_add(1, Ordering::SeqCst);
                    return Some(Ok(text));
                }
                ScriptStep::Fail(message) => {
                    self.failed = true;
                    return Some(Err(EngineError::Failed {
                        stage: "scripted-fail",
                        message,
                    }));
                }
            }
        }
    }
}

struct ActiveGuard {
    counters: ScriptCounters,
}

impl ActiveGuard {
    fn enter(counters: ScriptCounters) -> Self {
        let active = counters.0.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.0.max_concurrent.fetch_max(active, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counters.0.active.fetch_sub(1, Ordering::SeqCst);
        self.counters
            .0
            .generations_ended
            .fetch_add(1, Ordering::SeqCst);
    }
}
