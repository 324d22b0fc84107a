use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Local;
use futures::StreamExt;
use lumen_engine::{EngineOptions, FragmentStream, GenerationWorker, WorkerError};
use lumen_storage::{
    MessageStore, NewSession, SessionId, SessionOrder, SessionPatch, SessionRecord, SessionStore,
    Storage, StorageError,
};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::chat::events::{CoordinatorEvent, GenerationId, SubmitOutcome, SubmitRejection};
use crate::chat::history::PromptHistoryBuilder;
use crate::chat::message::{Message, Sender};
use crate::chat::outcome::GenerationOutcome;
use crate::settings::{ModelSettings, SharedSettings};

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CoordinatorError {
    #[snafu(display("generation coordinator needs a tokio runtime on `{stage}`: {source}"))]
    NoRuntime {
        stage: &'static str,
        source: tokio::runtime::TryCurrentError,
    },
    #[snafu(display("no model artifact is configured"))]
    ModelNotConfigured { stage: &'static str },
    #[snafu(display("model artifact not found at {path}"))]
    ModelMissing { stage: &'static str, path: String },
    #[snafu(display("failed to configure generation worker: {source}"))]
    Worker {
        stage: &'static str,
        source: WorkerError,
    },
    #[snafu(display("conversation storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("session {session_id} does not exist"))]
    SessionNotFound {
        stage: &'static str,
        session_id: SessionId,
    },
}

/// Rate limit for partial-output publications.
///
/// The first call always passes; later calls pass once `interval` has elapsed
/// since the last accepted one.
#[derive(Debug, Clone)]
pub(crate) struct PublishThrottle {
    interval: Duration,
    last_published: Option<Instant>,
}

impl PublishThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_published: None,
        }
    }

    pub(crate) fn should_publish(&mut self, now: Instant) -> bool {
        if let Some(last_published) = self.last_published
            && now.saturating_duration_since(last_published) < self.interval
        {
            return false;
        }
        self.last_published = Some(now);
        true
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    generation: GenerationId,
    placeholder: lumen_storage::MessageId,
    epoch: u64,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    messages: Vec<Message>,
    active_session: Option<SessionId>,
    generating: bool,
    model_ready: bool,
    initialization_error: Option<String>,
    /// Bumped whenever the conversation is replaced; generations started in an
    /// older epoch can no longer touch the conversation.
    epoch: u64,
    next_generation: u64,
    in_flight: Option<InFlight>,
}

impl CoordinatorState {
    fn current(&self, generation: GenerationId) -> Option<InFlight> {
        self.in_flight.filter(|in_flight| {
            in_flight.generation == generation && in_flight.epoch == self.epoch
        })
    }

    fn snapshot(&self) -> CoordinatorEvent {
        CoordinatorEvent::ConversationChanged(self.messages.clone())
    }
}

struct Shared {
    worker: GenerationWorker,
    store: Arc<dyn Storage>,
    settings: SharedSettings,
    runtime: Handle,
    state: Mutex<CoordinatorState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CoordinatorEvent>>>,
}

/// Owner of the in-memory conversation and the generation lifecycle.
///
/// At most one generation is in flight at a time. Partial output is
/// throttled before publication, every outcome is classified into a final
/// message, and finished turns are written through to the store. Store
/// failures are logged and never reach the conversation.
#[derive(Clone)]
pub struct GenerationCoordinator {
    shared: Arc<Shared>,
}

impl GenerationCoordinator {
    /// Must be called from inside a tokio runtime; fragment consumption is spawned on it.
    pub fn new(
        worker: GenerationWorker,
        store: Arc<dyn Storage>,
        settings: SharedSettings,
    ) -> CoordinatorResult<Self> {
        let runtime = Handle::try_current().context(NoRuntimeSnafu {
            stage: "coordinator-runtime-handle",
        })?;
        Ok(Self {
            shared: Arc::new(Shared {
                worker,
                store,
                settings,
                runtime,
                state: Mutex::new(CoordinatorState {
                    next_generation: 1,
                    ..CoordinatorState::default()
                }),
                subscribers: Mutex::default(),
            }),
        })
    }

    /// Validates the configured model and hands its options to the worker.
    ///
    /// Any kept engine instance is discarded, so the next request is built from
    /// the current settings. Failures are kept as the initialization error until
    /// the next successful call.
    pub fn initialize(&self) -> CoordinatorResult<()> {
        let settings = self.shared.settings.load_full();
        let result = validated_engine_options(&settings.model).and_then(|options| {
            self.shared.worker.reload(options).context(WorkerSnafu {
                stage: "coordinator-configure-worker",
            })
        });

        let mut state = self.shared.lock_state();
        let mut events = Vec::new();
        match &result {
            Ok(()) => {
                tracing::info!(model_path = %settings.model.path, "model ready");
                state.initialization_error = None;
                if !state.model_ready {
                    state.model_ready = true;
                    events.push(CoordinatorEvent::ModelReadyChanged(true));
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "model initialization failed");
                let description = error.to_string();
                state.initialization_error = Some(description.clone());
                if state.model_ready {
                    state.model_ready = false;
                    events.push(CoordinatorEvent::ModelReadyChanged(false));
                }
                events.push(CoordinatorEvent::Error(description));
            }
        }
        self.shared.publish(events);
        result
    }

    pub fn submit(&self, prompt: &str) -> SubmitOutcome {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return SubmitOutcome::Rejected(SubmitRejection::EmptyPrompt);
        }

        let settings = self.shared.settings.load_full();
        let mut state = self.shared.lock_state();
        if state.generating || state.in_flight.is_some() {
            tracing::debug!("submit ignored while a generation is in flight");
            return SubmitOutcome::Rejected(SubmitRejection::AlreadyGenerating);
        }
        if !state.model_ready {
            return SubmitOutcome::Rejected(SubmitRejection::ModelNotReady);
        }

        // The new turn is placed at the open marker, so history excludes it.
        let full_prompt =
            PromptHistoryBuilder::from_settings(&settings).build(&state.messages, prompt, Local::now());

        let generation = GenerationId::new(state.next_generation);
        state.next_generation += 1;
        let user = Message::user(prompt);
        let placeholder = Message::placeholder();
        state.in_flight = Some(InFlight {
            generation,
            placeholder: placeholder.id,
            epoch: state.epoch,
        });
        state.generating = true;

        if let Some(session_id) = state.active_session {
            self.shared.write_through(session_id, &user);
        }
        state.messages.push(user);
        state.messages.push(placeholder);

        let fragments = self.shared.worker.generate(full_prompt);
        tracing::info!(
            generation = %generation,
            request = fragments.request_id(),
            prompt_chars = prompt.chars().count(),
            "generation submitted"
        );
        self.shared.publish([
            CoordinatorEvent::GeneratingChanged(true),
            state.snapshot(),
        ]);
        drop(state);

        self.shared.runtime.spawn(consume_fragments(
            Arc::clone(&self.shared),
            generation,
            fragments,
            settings.streaming.publish_interval(),
        ));
        SubmitOutcome::Accepted(generation)
    }

    /// Asks the worker to stop and clears the generating flag right away.
    ///
    /// The message itself is settled later by the stream's own finalization.
    pub fn cancel(&self) {
        let mut state = self.shared.lock_state();
        if state.in_flight.is_none() {
            return;
        }

        self.shared.worker.cancel();
        if state.generating {
            tracing::info!("generation cancelled by user");
            state.generating = false;
            self.shared
                .publish([CoordinatorEvent::GeneratingChanged(false)]);
        }
    }

    pub fn load_session(&self, session_id: SessionId) -> CoordinatorResult<()> {
        let store = &self.shared.store;
        store
            .get_session(session_id)
            .context(StorageSnafu {
                stage: "load-session-get",
            })?
            .context(SessionNotFoundSnafu {
                stage: "load-session-get",
                session_id,
            })?;
        let messages = store
            .list_messages(session_id)
            .context(StorageSnafu {
                stage: "load-session-messages",
            })?
            .into_iter()
            .map(Message::from)
            .collect::<Vec<_>>();

        let mut state = self.shared.lock_state();
        tracing::info!(session_id = %session_id, messages = messages.len(), "session loaded");
        let events = self.shared.replace_conversation(&mut state, messages, Some(session_id));
        self.shared.publish(events);
        Ok(())
    }

    /// Clears the conversation without deleting anything.
    pub fn start_new_chat(&self) {
        let mut state = self.shared.lock_state();
        let events = self.shared.replace_conversation(&mut state, Vec::new(), None);
        self.shared.publish(events);
    }

    /// Falls back to a new chat when the deleted session is the active one.
    pub fn handle_session_deletion(&self, session_id: SessionId) {
        let mut state = self.shared.lock_state();
        if state.active_session != Some(session_id) {
            return;
        }
        tracing::info!(session_id = %session_id, "active session deleted");
        let events = self.shared.replace_conversation(&mut state, Vec::new(), None);
        self.shared.publish(events);
    }

    pub fn delete_session(&self, session_id: SessionId) -> CoordinatorResult<()> {
        self.shared
            .store
            .delete_session(session_id)
            .context(StorageSnafu {
                stage: "delete-session",
            })?;
        self.handle_session_deletion(session_id);
        Ok(())
    }

    pub fn list_sessions(&self, pinned_first: bool) -> CoordinatorResult<Vec<SessionRecord>> {
        let order = if pinned_first {
            SessionOrder::pinned_first()
        } else {
            SessionOrder::recency()
        };
        self.shared
            .store
            .list_sessions(order)
            .context(StorageSnafu {
                stage: "list-sessions",
            })
    }

    /// Custom title when set, otherwise a summary of the first user turn.
    pub fn session_title(&self, session: &SessionRecord) -> String {
        if session
            .custom_title
            .as_deref()
            .is_some_and(|title| !title.trim().is_empty())
        {
            return session.title();
        }
        match self.shared.store.list_messages(session.id) {
            Ok(messages) => session.summary_title(&messages),
            Err(error) => {
                tracing::warn!(session_id = %session.id, error = %error, "failed to summarize session");
                session.title()
            }
        }
    }

    pub fn rename_session(
        &self,
        session_id: SessionId,
        title: Option<String>,
    ) -> CoordinatorResult<SessionRecord> {
        self.shared
            .store
            .update_session(session_id, SessionPatch::rename(title))
            .context(StorageSnafu {
                stage: "rename-session",
            })
    }

    pub fn set_pinned(&self, session_id: SessionId, pinned: bool) -> CoordinatorResult<SessionRecord> {
        self.shared
            .store
            .update_session(session_id, SessionPatch::pin(pinned))
            .context(StorageSnafu {
                stage: "pin-session",
            })
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CoordinatorEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.lock_subscribers().push(sender);
        receiver
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock_state().messages.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.shared.lock_state().generating
    }

    pub fn is_model_ready(&self) -> bool {
        self.shared.lock_state().model_ready
    }

    pub fn initialization_error(&self) -> Option<String> {
        self.shared.lock_state().initialization_error.clone()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.shared.lock_state().active_session
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<CoordinatorEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Callers hold the state lock so observers see events in mutation order.
    fn publish(&self, events: impl IntoIterator<Item = CoordinatorEvent>) {
        let mut subscribers = self.lock_subscribers();
        for event in events {
            subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
        }
    }

    fn replace_conversation(
        &self,
        state: &mut CoordinatorState,
        messages: Vec<Message>,
        active_session: Option<SessionId>,
    ) -> Vec<CoordinatorEvent> {
        let mut events = Vec::new();
        if let Some(in_flight) = state.in_flight.take() {
            tracing::debug!(generation = %in_flight.generation, "abandoning in-flight generation");
            self.worker.cancel();
        }
        state.epoch += 1;
        if state.generating {
            state.generating = false;
            events.push(CoordinatorEvent::GeneratingChanged(false));
        }
        state.messages = messages;
        state.active_session = active_session;
        events.push(state.snapshot());
        events
    }

    /// Returns `false` once the generation no longer owns the conversation.
    fn publish_partial(&self, generation: GenerationId, text: &str) -> bool {
        let mut state = self.lock_state();
        let Some(in_flight) = state.current(generation) else {
            return false;
        };
        if let Some(placeholder) = state
            .messages
            .iter_mut()
            .rev()
            .find(|message| message.id == in_flight.placeholder)
        {
            placeholder.text = text.to_string();
        }
        self.publish([state.snapshot()]);
        true
    }

    fn finalize(&self, generation: GenerationId, text: &str, outcome: GenerationOutcome) {
        let mut state = self.lock_state();
        let Some(in_flight) = state.current(generation) else {
            tracing::debug!(
                generation = %generation,
                outcome = ?outcome.kind(),
                "discarding finalize from an abandoned generation"
            );
            return;
        };
        state.in_flight = None;

        let mut events = Vec::new();
        if state.generating {
            state.generating = false;
            events.push(CoordinatorEvent::GeneratingChanged(false));
        }

        let finalized = match state
            .messages
            .iter()
            .position(|message| message.id == in_flight.placeholder)
        {
            Some(index) => match outcome.finalize_placeholder(&state.messages[index], text) {
                Some(message) => {
                    state.messages[index] = message.clone();
                    Some(message)
                }
                None => {
                    state.messages.remove(index);
                    None
                }
            },
            None => None,
        };

        match &outcome {
            GenerationOutcome::Completed => {
                tracing::info!(generation = %generation, chars = text.chars().count(), "generation completed");
            }
            GenerationOutcome::Cancelled => {
                tracing::info!(generation = %generation, chars = text.chars().count(), "generation stopped");
            }
            GenerationOutcome::Failed(error) => {
                tracing::warn!(generation = %generation, error = %error, "generation failed");
                if error.is_configuration_failure() {
                    let description = error.to_string();
                    state.model_ready = false;
                    state.initialization_error = Some(description.clone());
                    events.push(CoordinatorEvent::ModelReadyChanged(false));
                    events.push(CoordinatorEvent::Error(description));
                }
            }
        }

        if let Some(message) = &finalized {
            if matches!(outcome, GenerationOutcome::Completed) && message.sender == Sender::Assistant
            {
                self.persist_reply(&mut state, message);
            } else if let Some(session_id) = state.active_session {
                self.write_through(session_id, message);
            }
        }

        events.push(state.snapshot());
        events.push(CoordinatorEvent::Finalized {
            generation,
            outcome: outcome.kind(),
        });
        self.publish(events);
    }

    /// Writes a successful reply, creating the session on the first one.
    fn persist_reply(&self, state: &mut CoordinatorState, reply: &Message) {
        if let Some(session_id) = state.active_session {
            self.write_through(session_id, reply);
            return;
        }
        if !state
            .messages
            .iter()
            .any(|message| message.sender == Sender::User)
        {
            return;
        }

        let session = match self.store.create_session(NewSession::default()) {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(error = %error, "failed to create session, conversation stays in memory");
                return;
            }
        };
        tracing::info!(session_id = %session.id, messages = state.messages.len(), "session created");
        for message in &state.messages {
            self.write_through(session.id, message);
        }
        state.active_session = Some(session.id);
    }

    fn write_through(&self, session_id: SessionId, message: &Message) {
        if let Err(error) = self.store.upsert_message(session_id, message.to_upsert()) {
            tracing::warn!(
                session_id = %session_id,
                message_id = %message.id,
                error = %error,
                "failed to persist message"
            );
        }
    }
}

fn validated_engine_options(model: &ModelSettings) -> CoordinatorResult<EngineOptions> {
    ensure!(
        !model.path.trim().is_empty(),
        ModelNotConfiguredSnafu {
            stage: "validate-model-path",
        }
    );
    ensure!(
        Path::new(&model.path).is_file(),
        ModelMissingSnafu {
            stage: "validate-model-path",
            path: model.path.clone(),
        }
    );
    Ok(model.engine_options())
}

async fn consume_fragments(
    shared: Arc<Shared>,
    generation: GenerationId,
    mut fragments: FragmentStream,
    publish_interval: Duration,
) {
    let mut text = String::new();
    let mut throttle = PublishThrottle::new(publish_interval);
    let mut failure = None;

    while let Some(item) = fragments.next().await {
        match item {
            Ok(fragment) => {
                text.push_str(&fragment);
                if throttle.should_publish(Instant::now())
                    && !shared.publish_partial(generation, &text)
                {
                    tracing::debug!(generation = %generation, "generation abandoned, dropping stream");
                    break;
                }
            }
            Err(error) => {
                failure = Some(error);
                break;
            }
        }
    }
    // Dropping the stream cancels the request if the worker is still producing.
    drop(fragments);

    shared.finalize(generation, &text, GenerationOutcome::from_stream_end(failure));
}
