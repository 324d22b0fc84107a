use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::engine::{EngineError, EngineFactory, EngineOptions, InferenceEngine, InstancePolicy};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WorkerError {
    #[snafu(display("inference engine is not configured"))]
    NotConfigured { stage: &'static str },
    #[snafu(display("failed to create inference engine instance: {source}"))]
    InstanceCreationFailed {
        stage: &'static str,
        source: EngineError,
    },
    #[snafu(display("{source}"))]
    Engine {
        stage: &'static str,
        source: EngineError,
    },
    #[snafu(display("generation was cancelled"))]
    Cancelled { stage: &'static str },
    #[snafu(display("generation worker is not running"))]
    Stopped { stage: &'static str },
    #[snafu(display("failed to build generation worker runtime"))]
    RuntimeInit {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to spawn generation worker thread"))]
    ThreadSpawn {
        stage: &'static str,
        source: std::io::Error,
    },
}

impl WorkerError {
    /// Failures that leave the engine unusable until it is configured again.
    pub fn is_configuration_failure(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured { .. } | Self::InstanceCreationFailed { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

enum WorkerCommand {
    Configure(EngineOptions),
    Reload(EngineOptions),
    Generate(GenerateJob),
}

struct GenerateJob {
    request: u64,
    prompt: String,
    events: mpsc::UnboundedSender<WorkerResult<String>>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ActiveRequest {
    request: u64,
    cancel: CancellationToken,
}

type ActiveRequests = Arc<Mutex<Vec<ActiveRequest>>>;

/// Handle to the thread that exclusively owns the inference engine.
///
/// Requests are queued on a channel and served one at a time, so the engine is
/// never entered by two generations at once. Dropping every handle closes the
/// queue and lets the thread exit after its current job.
pub struct GenerationWorker {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    active: ActiveRequests,
    next_request: AtomicU64,
}

impl GenerationWorker {
    pub fn spawn(factory: Arc<dyn EngineFactory>) -> WorkerResult<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let active: ActiveRequests = Arc::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context(RuntimeInitSnafu {
                stage: "worker-runtime-build",
            })?;

        let actor_active = Arc::clone(&active);
        std::thread::Builder::new()
            .name("generation-worker".to_string())
            .spawn(move || {
                // The engine instance is created and dropped on this thread only.
                let actor = WorkerActor {
                    factory,
                    options: None,
                    engine: None,
                    active: actor_active,
                };
                runtime.block_on(actor.run(receiver));
            })
            .context(ThreadSpawnSnafu {
                stage: "worker-spawn-thread",
            })?;

        Ok(Self {
            commands,
            active,
            next_request: AtomicU64::new(1),
        })
    }

    /// Stores the engine options used by later requests; repeating the same options is a no-op.
    pub fn configure(&self, options: EngineOptions) -> WorkerResult<()> {
        self.commands
            .send(WorkerCommand::Configure(options))
            .ok()
            .context(StoppedSnafu {
                stage: "worker-configure-send",
            })
    }

    /// Like [`configure`](Self::configure), but always discards a kept instance so the
    /// next request goes through the factory again.
    pub fn reload(&self, options: EngineOptions) -> WorkerResult<()> {
        self.commands
            .send(WorkerCommand::Reload(options))
            .ok()
            .context(StoppedSnafu {
                stage: "worker-reload-send",
            })
    }

    pub fn generate(&self, prompt: impl Into<String>) -> FragmentStream {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (events, receiver) = mpsc::unbounded_channel();
        lock_active(&self.active).push(ActiveRequest {
            request,
            cancel: cancel.clone(),
        });

        let job = GenerateJob {
            request,
            prompt: prompt.into(),
            events,
            cancel: cancel.clone(),
        };
        if let Err(mpsc::error::SendError(WorkerCommand::Generate(job))) =
            self.commands.send(WorkerCommand::Generate(job))
        {
            release_request(&self.active, request);
            let _ = job.events.send(
                StoppedSnafu {
                    stage: "worker-generate-send",
                }
                .fail(),
            );
        }

        FragmentStream {
            request,
            events: receiver,
            cancel,
        }
    }

    /// Requests cooperative termination of every queued or running generation.
    pub fn cancel(&self) {
        for active in lock_active(&self.active).iter() {
            if !active.cancel.is_cancelled() {
                tracing::debug!(request = active.request, "cancelling generation");
                active.cancel.cancel();
            }
        }
    }
}

fn lock_active(active: &ActiveRequests) -> MutexGuard<'_, Vec<ActiveRequest>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release_request(active: &ActiveRequests, request: u64) {
    lock_active(active).retain(|entry| entry.request != request);
}

struct WorkerActor {
    factory: Arc<dyn EngineFactory>,
    options: Option<EngineOptions>,
    engine: Option<(EngineOptions, Box<dyn InferenceEngine>)>,
    active: ActiveRequests,
}

impl WorkerActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                WorkerCommand::Configure(options) => self.configure(options),
                WorkerCommand::Reload(options) => {
                    self.engine = None;
                    self.options = None;
                    self.configure(options);
                }
                WorkerCommand::Generate(job) => {
                    let request = job.request;
                    self.serve(job).await;
                    release_request(&self.active, request);
                }
            }
        }
        tracing::debug!("generation worker queue closed");
    }

    fn configure(&mut self, options: EngineOptions) {
        if self.options.as_ref() == Some(&options) {
            return;
        }
        tracing::info!(
            model_path = %options.model_path.display(),
            max_tokens = options.max_tokens,
            instance_policy = ?options.instance_policy,
            "generation worker configured"
        );
        self.engine = None;
        self.options = Some(options);
    }

    async fn serve(&mut self, job: GenerateJob) {
        let GenerateJob {
            request,
            prompt,
            events,
            cancel,
        } = job;
        tracing::debug!(request, prompt_chars = prompt.chars().count(), "generation started");

        match self.run_job(&prompt, &events, &cancel).await {
            Ok(()) => tracing::debug!(request, "generation finished"),
            Err(error) => {
                if error.is_cancelled() {
                    tracing::debug!(request, "generation stopped after cancellation");
                } else {
                    tracing::warn!(request, error = %error, "generation failed");
                }
                let _ = events.send(Err(error));
            }
        }
    }

    async fn run_job(
        &mut self,
        prompt: &str,
        events: &mpsc::UnboundedSender<WorkerResult<String>>,
        cancel: &CancellationToken,
    ) -> WorkerResult<()> {
        if cancel.is_cancelled() || events.is_closed() {
            return CancelledSnafu {
                stage: "worker-before-start",
            }
            .fail();
        }

        let options = self.options.clone().context(NotConfiguredSnafu {
            stage: "worker-load-options",
        })?;
        let mut engine = self.prepare_engine(&options)?;
        let outcome = pump_fragments(engine.as_mut(), prompt, events, cancel).await;

        if options.instance_policy == InstancePolicy::Reuse {
            self.engine = Some((options, engine));
        }
        outcome
    }

    fn prepare_engine(&mut self, options: &EngineOptions) -> WorkerResult<Box<dyn InferenceEngine>> {
        if options.instance_policy == InstancePolicy::Reuse
            && let Some((cached_options, mut engine)) = self.engine.take()
            && cached_options == *options
        {
            engine.reset().context(InstanceCreationFailedSnafu {
                stage: "worker-reset-instance",
            })?;
            return Ok(engine);
        }

        self.engine = None;
        self.factory
            .create(options)
            .context(InstanceCreationFailedSnafu {
                stage: "worker-create-instance",
            })
    }
}

async fn pump_fragments(
    engine: &mut dyn InferenceEngine,
    prompt: &str,
    events: &mpsc::UnboundedSender<WorkerResult<String>>,
    cancel: &CancellationToken,
) -> WorkerResult<()> {
    let mut fragments = engine.generate(prompt);
    loop {
        // Cooperative checkpoints: a fragment already being produced is never interrupted.
        if cancel.is_cancelled() || events.is_closed() {
            return CancelledSnafu {
                stage: "worker-before-read",
            }
            .fail();
        }

        match fragments.next().await {
            Some(Ok(fragment)) => {
                if cancel.is_cancelled() {
                    return CancelledSnafu {
                        stage: "worker-after-read",
                    }
                    .fail();
                }
                if fragment.is_empty() {
                    continue;
                }
                if events.send(Ok(fragment)).is_err() {
                    cancel.cancel();
                    return CancelledSnafu {
                        stage: "worker-consumer-gone",
                    }
                    .fail();
                }
            }
            Some(Err(source)) if source.is_missing_program() => {
                return Err(WorkerError::InstanceCreationFailed {
                    stage: "worker-engine-start",
                    source,
                });
            }
            Some(Err(source)) => {
                return Err(WorkerError::Engine {
                    stage: "worker-engine-fragment",
                    source,
                });
            }
            None => return Ok(()),
        }
    }
}

/// Fragments of one generation, ending with `Err` on failure or cancellation.
///
/// Dropping the stream cancels the generation it belongs to.
#[derive(Debug)]
pub struct FragmentStream {
    request: u64,
    events: mpsc::UnboundedReceiver<WorkerResult<String>>,
    cancel: CancellationToken,
}

impl FragmentStream {
    pub fn request_id(&self) -> u64 {
        self.request
    }
}

impl Stream for FragmentStream {
    type Item = WorkerResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::scripted::{ScriptStep, ScriptedFactory};

    fn options(model: &NamedTempFile) -> EngineOptions {
        EngineOptions::new(model.path(), 64)
    }

    async fn drain(stream: FragmentStream) -> (String, Option<WorkerError>) {
        let mut text = String::new();
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => text.push_str(&fragment),
                Err(error) => return (text, Some(error)),
            }
        }
        (text, None)
    }

    #[tokio::test]
    async fn unconfigured_worker_reports_not_configured() {
        let factory = ScriptedFactory::new(vec![ScriptStep::fragment("unused")]);
        let worker = GenerationWorker::spawn(Arc::new(factory)).expect("spawn worker");

        let (text, error) = drain(worker.generate("hi")).await;
        assert!(text.is_empty());
        assert!(matches!(error, Some(WorkerError::NotConfigured { .. })));
    }

    #[tokio::test]
    async fn streams_fragments_in_order() {
        let model = NamedTempFile::new().expect("model");
        let factory = ScriptedFactory::new(vec![
            ScriptStep::fragment("Hel"),
            ScriptStep::fragment(""),
            ScriptStep::fragment("lo"),
        ]);
        let worker = GenerationWorker::spawn(Arc::new(factory)).expect("spawn worker");
        worker.configure(options(&model)).expect("configure");

        let (text, error) = drain(worker.generate("hi")).await;
        assert_eq!(text, "Hello");
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn creation_failure_is_typed() {
        let model = NamedTempFile::new().expect("model");
        let factory = ScriptedFactory::new(Vec::new()).failing_creation();
        let worker = GenerationWorker::spawn(Arc::new(factory)).expect("spawn worker");
        worker.configure(options(&model)).expect("configure");

        let (_, error) = drain(worker.generate("hi")).await;
        let error = error.expect("creation must fail");
        assert!(matches!(error, WorkerError::InstanceCreationFailed { .. }));
        assert!(error.is_configuration_failure());
    }

    struct VanishingProgram;

    impl InferenceEngine for VanishingProgram {
        fn generate<'a>(&'a mut self, _prompt: &'a str) -> crate::EngineStream<'a> {
            Box::pin(futures::stream::once(async {
                Err::<String, _>(EngineError::Spawn {
                    stage: "test-spawn",
                    program: "llama-cli".to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
            }))
        }
    }

    impl EngineFactory for VanishingProgram {
        fn create(&self, _options: &EngineOptions) -> crate::EngineResult<Box<dyn InferenceEngine>> {
            Ok(Box::new(VanishingProgram))
        }
    }

    #[tokio::test]
    async fn program_missing_at_spawn_is_a_creation_failure() {
        let model = NamedTempFile::new().expect("model");
        let worker = GenerationWorker::spawn(Arc::new(VanishingProgram)).expect("spawn worker");
        worker.configure(options(&model)).expect("configure");

        let (_, error) = drain(worker.generate("hi")).await;
        let error = error.expect("spawn must fail");
        assert!(matches!(error, WorkerError::InstanceCreationFailed { .. }));
        assert!(error.is_configuration_failure());
    }

    #[tokio::test]
    async fn engine_failure_keeps_partial_output() {
        let model = NamedTempFile::new().expect("model");
        let factory = ScriptedFactory::new(vec![
            ScriptStep::fragment("partial"),
            ScriptStep::fail("gpu lost"),
        ]);
        let worker = GenerationWorker::spawn(Arc::new(factory)).expect("spawn worker");
        worker.configure(options(&model)).expect("configure");

        let (text, error) = drain(worker.generate("hi")).await;
        assert_eq!(text, "partial");
        let error = error.expect("engine error");
        assert!(matches!(error, WorkerError::Engine { .. }));
        assert_eq!(error.to_string(), "gpu lost");
    }

    #[tokio::test]
    async fn cancel_is_reported_as_cancelled() {
        let model = NamedTempFile::new().expect("model");
        let factory = ScriptedFactory::new(vec![
            ScriptStep::fragment("one"),
            ScriptStep::delay(Duration::from_millis(50)),
            ScriptStep::fragment("two"),
        ]);
        let counters = factory.counters();
        let worker = GenerationWorker::spawn(Arc::new(factory)).expect("spawn worker");
        worker.configure(options(&model)).expect("configure");

        let mut stream = worker.generate("hi");
        let first = stream.next().await.expect("first item").expect("first fragment");
        assert_eq!(first, "one");
        worker.cancel();
        worker.cancel();

        let (rest, error) = drain(stream).await;
        assert!(rest.is_empty());
        assert!(matches!(error, Some(WorkerError::Cancelled { .. })));
        counters.wait_for_ended(1).await;
        assert_eq!(counters.generations_ended(), 1);

        // Cancelling while idle is harmless.
        worker.cancel();
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_engine() {
        let model = NamedTempFile::new().expect("model");
        let mut steps = Vec::new();
        for index in 0..50 {
            steps.push(ScriptStep::fragment(format!("{index} ")));
            steps.push(ScriptStep::delay(Duration::from_millis(5)));
        }
        let factory = ScriptedFactory::new(steps);
        let counters = factory.counters();
        let worker = GenerationWorker::spawn(Arc::new(factory)).expect("spawn worker");
        worker.configure(options(&model)).expect("configure");

        let mut stream = worker.generate("hi");
        stream.next().await.expect("first item").expect("first fragment");
        drop(stream);

        counters.wait_for_ended(1).await;
        assert!(counters.fragments_pulled() < 50);
    }

    #[tokio::test]
    async fn fresh_policy_recreates_and_reuse_policy_resets() {
        let model = NamedTempFile::new().expect("model");

        let fresh = ScriptedFactory::new(vec![ScriptStep::fragment("ok")]);
        let fresh_counters = fresh.counters();
        let worker = GenerationWorker::spawn(Arc::new(fresh)).expect("spawn worker");
        worker.configure(options(&model)).expect("configure");
        drain(worker.generate("a")).await;
        drain(worker.generate("b")).await;
        assert_eq!(fresh_counters.instances_created(), 2);

        let reuse = ScriptedFactory::new(vec![ScriptStep::fragment("ok")]);
        let reuse_counters = reuse.counters();
        let worker = GenerationWorker::spawn(Arc::new(reuse)).expect("spawn worker");
        worker
            .configure(options(&model).with_instance_policy(InstancePolicy::Reuse))
            .expect("configure");
        drain(worker.generate("a")).await;
        drain(worker.generate("b")).await;
        assert_eq!(reuse_counters.instances_created(), 1);
        assert_eq!(reuse_counters.resets(), 1);
    }

    #[tokio::test]
    async fn reload_discards_a_kept_instance() {
        let model = NamedTempFile::new().expect("model");
        let factory = ScriptedFactory::new(vec![ScriptStep::fragment("ok")]);
        let counters = factory.counters();
        let worker = GenerationWorker::spawn(Arc::new(factory)).expect("spawn worker");
        let reuse = options(&model).with_instance_policy(InstancePolicy::Reuse);

        worker.configure(reuse.clone()).expect("configure");
        drain(worker.generate("a")).await;
        worker.configure(reuse.clone()).expect("configure again");
        drain(worker.generate("b")).await;
        assert_eq!(counters.instances_created(), 1);

        worker.reload(reuse).expect("reload");
        drain(worker.generate("c")).await;
        assert_eq!(counters.instances_created(), 2);
    }

    #[tokio::test]
    async fn overlapping_requests_are_serialized() {
        let model = NamedTempFile::new().expect("model");
        let factory = ScriptedFactory::new(vec![
            ScriptStep::fragment("a"),
            ScriptStep::delay(Duration::from_millis(20)),
            ScriptStep::fragment("b"),
        ]);
        let counters = factory.counters();
        let worker = GenerationWorker::spawn(Arc::new(factory)).expect("spawn worker");
        worker.configure(options(&model)).expect("configure");

        let first = worker.generate("one");
        let second = worker.generate("two");
        let ((first_text, _), (second_text, _)) = tokio::join!(drain(first), drain(second));

        assert_eq!(first_text, "ab");
        assert_eq!(second_text, "ab");
        assert_eq!(counters.max_concurrent(), 1);
    }
}
