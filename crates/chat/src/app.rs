use std::io::Write;
use std::sync::Arc;

use lumen_engine::{GenerationWorker, WorkerError};
use lumen_storage::{MemoryStorage, MessageId, SessionRecord, SqliteStorage, Storage};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::chat::{
    CoordinatorError, CoordinatorEvent, CoordinatorResult, GenerationCoordinator, Message, Sender,
    SubmitOutcome, SubmitRejection,
};
use crate::settings::{ConfiguredEngineFactory, SettingsStore, StorageSettings};

const HELP: &str = "Type a message to chat. Commands: /stop /new /sessions /load N /delete N \
/pin N /rename N [title] /init /help /quit";

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to start generation worker on `{stage}`: {source}"))]
    StartWorker {
        stage: &'static str,
        source: WorkerError,
    },
    #[snafu(display("failed to start coordinator on `{stage}`: {source}"))]
    StartCoordinator {
        stage: &'static str,
        source: CoordinatorError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    Stop,
    New,
    Sessions,
    /// Indices are 1-based positions in the last `/sessions` listing.
    Load(usize),
    Delete(usize),
    Pin(usize),
    Rename(usize, Option<String>),
    Init,
    Help,
    Quit,
    Invalid(String),
}

impl Command {
    /// `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(body) = line.strip_prefix('/') else {
            return Some(Self::Submit(line.to_string()));
        };

        let (name, args) = body
            .split_once(char::is_whitespace)
            .map(|(name, args)| (name, args.trim()))
            .unwrap_or((body, ""));
        let command = match name {
            "stop" => Self::Stop,
            "new" => Self::New,
            "sessions" => Self::Sessions,
            "init" => Self::Init,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "load" => parse_index(args).map_or_else(|| usage("/load N"), Self::Load),
            "delete" => parse_index(args).map_or_else(|| usage("/delete N"), Self::Delete),
            "pin" => parse_index(args).map_or_else(|| usage("/pin N"), Self::Pin),
            "rename" => {
                let (index, title) = args
                    .split_once(char::is_whitespace)
                    .map(|(index, title)| (index, title.trim()))
                    .unwrap_or((args, ""));
                let title = (!title.is_empty()).then(|| title.to_string());
                parse_index(index)
                    .map_or_else(|| usage("/rename N [title]"), |index| Self::Rename(index, title))
            }
            other => Self::Invalid(format!("unknown command /{other}")),
        };
        Some(command)
    }
}

fn parse_index(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok().filter(|index| *index > 0)
}

fn usage(text: &str) -> Command {
    Command::Invalid(format!("usage: {text}"))
}

/// Turns coordinator events into terminal output.
///
/// Only the reply of the generation that announced itself with
/// `GeneratingChanged(true)` is streamed; loaded transcripts are printed by
/// the command that loaded them.
#[derive(Debug)]
pub struct TranscriptPrinter {
    assistant_name: String,
    armed: bool,
    streaming: Option<(MessageId, usize)>,
}

impl TranscriptPrinter {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            armed: false,
            streaming: None,
        }
    }

    pub fn render(&mut self, event: &CoordinatorEvent) -> Option<String> {
        match event {
            CoordinatorEvent::GeneratingChanged(true) => {
                self.armed = true;
                None
            }
            CoordinatorEvent::GeneratingChanged(false) => None,
            CoordinatorEvent::ConversationChanged(messages) => self.render_conversation(messages),
            CoordinatorEvent::ModelReadyChanged(true) => Some("[model ready]\n".to_string()),
            CoordinatorEvent::ModelReadyChanged(false) => {
                Some("[model unavailable]\n".to_string())
            }
            CoordinatorEvent::Error(text) => Some(format!("[error] {text}\n")),
            CoordinatorEvent::Finalized { .. } => self.streaming.take().map(|_| "\n".to_string()),
        }
    }

    fn render_conversation(&mut self, messages: &[Message]) -> Option<String> {
        if std::mem::take(&mut self.armed)
            && let Some(placeholder) = messages.last()
            && placeholder.is_placeholder()
        {
            self.streaming = Some((placeholder.id, 0));
            return Some(format!("{}: ", self.assistant_name));
        }

        let (id, printed) = self.streaming?;
        let Some(message) = messages.iter().rev().find(|message| message.id == id) else {
            // Placeholder removed or conversation replaced.
            self.streaming = None;
            return Some("\n".to_string());
        };

        // Final texts always extend what was streamed.
        let rest = message.text.get(printed..).unwrap_or_default();
        self.streaming = Some((id, message.text.len()));
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

pub fn format_message(assistant_name: &str, message: &Message) -> String {
    match message.sender {
        Sender::User => format!("You: {}", message.text),
        Sender::Assistant => format!("{assistant_name}: {}", message.text),
        Sender::Info => format!("[info] {}", message.text),
        Sender::Error { .. } => format!("[error] {}", message.text),
    }
}

async fn open_store(settings: &StorageSettings) -> Arc<dyn Storage> {
    let path = settings.resolved_database_path();
    match SqliteStorage::open(&path.to_string_lossy()).await {
        Ok(store) => {
            tracing::info!(path = %path.display(), "conversation store opened");
            Arc::new(store)
        }
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to open conversation store, history will not be kept"
            );
            Arc::new(MemoryStorage::new())
        }
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<CoordinatorEvent>, assistant_name: String) {
    let mut printer = TranscriptPrinter::new(assistant_name);
    while let Some(event) = events.recv().await {
        if let Some(text) = printer.render(&event) {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
    }
}

struct Session {
    coordinator: GenerationCoordinator,
    settings: SettingsStore,
    listed: Vec<SessionRecord>,
}

impl Session {
    fn execute(&mut self, command: Command) -> CoordinatorResult<()> {
        match command {
            Command::Submit(text) => self.submit(&text),
            Command::Stop => self.coordinator.cancel(),
            Command::New => {
                self.coordinator.start_new_chat();
                println!("[new chat]");
            }
            Command::Sessions => self.list_sessions()?,
            Command::Load(index) => {
                if let Some(session) = self.listed_session(index) {
                    self.coordinator.load_session(session.id)?;
                    self.print_transcript();
                }
            }
            Command::Delete(index) => {
                if let Some(session) = self.listed_session(index) {
                    self.coordinator.delete_session(session.id)?;
                    self.listed.remove(index - 1);
                    println!("[deleted]");
                }
            }
            Command::Pin(index) => {
                if let Some(session) = self.listed_session(index) {
                    let record = self.coordinator.set_pinned(session.id, !session.pinned)?;
                    println!("[{}]", if record.pinned { "pinned" } else { "unpinned" });
                    self.listed[index - 1] = record;
                }
            }
            Command::Rename(index, title) => {
                if let Some(session) = self.listed_session(index) {
                    let record = self.coordinator.rename_session(session.id, title)?;
                    println!("[renamed to {}]", self.coordinator.session_title(&record));
                    self.listed[index - 1] = record;
                }
            }
            Command::Init => {
                self.settings.reload();
                if let Err(error) = self.coordinator.initialize() {
                    tracing::debug!(error = %error, "re-initialization failed");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Invalid(text) => println!("[{text}]"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn submit(&self, text: &str) {
        match self.coordinator.submit(text) {
            SubmitOutcome::Accepted(_) | SubmitOutcome::Rejected(SubmitRejection::EmptyPrompt) => {}
            SubmitOutcome::Rejected(SubmitRejection::AlreadyGenerating) => {
                println!("[still generating, /stop to cancel]");
            }
            SubmitOutcome::Rejected(SubmitRejection::ModelNotReady) => {
                let reason = self
                    .coordinator
                    .initialization_error()
                    .unwrap_or_else(|| "not initialized".to_string());
                println!(
                    "[model not ready: {reason}; edit {} and run /init]",
                    self.settings.config_path().display()
                );
            }
        }
    }

    fn list_sessions(&mut self) -> CoordinatorResult<()> {
        self.listed = self.coordinator.list_sessions(true)?;
        if self.listed.is_empty() {
            println!("[no saved sessions]");
            return Ok(());
        }

        let active = self.coordinator.active_session();
        for (position, session) in self.listed.iter().enumerate() {
            let marker = if Some(session.id) == active { "*" } else { " " };
            let pin = if session.pinned { " (pinned)" } else { "" };
            println!(
                "{marker}{:>3}. {}{pin}",
                position + 1,
                self.coordinator.session_title(session)
            );
        }
        Ok(())
    }

    fn listed_session(&self, index: usize) -> Option<SessionRecord> {
        let session = self.listed.get(index.wrapping_sub(1)).cloned();
        if session.is_none() {
            println!("[no session {index}; run /sessions first]");
        }
        session
    }

    fn print_transcript(&self) {
        let settings = self.settings.settings();
        for message in self.coordinator.messages() {
            println!(
                "{}",
                format_message(&settings.persona.assistant_name, &message)
            );
        }
    }
}

/// Runs the interactive terminal chat until `/quit` or end of input.
pub async fn run() -> AppResult<()> {
    let settings = SettingsStore::load();
    let current = settings.settings();

    let store = open_store(&current.storage).await;
    let factory = ConfiguredEngineFactory::new(settings.shared());
    let worker = GenerationWorker::spawn(Arc::new(factory)).context(StartWorkerSnafu {
        stage: "app-spawn-worker",
    })?;
    let coordinator = GenerationCoordinator::new(worker, store, settings.shared()).context(
        StartCoordinatorSnafu {
            stage: "app-create-coordinator",
        },
    )?;

    let printer = tokio::spawn(print_events(
        coordinator.subscribe(),
        current.persona.assistant_name.clone(),
    ));
    println!(
        "{} ({} persona). {HELP}",
        current.persona.assistant_name,
        current.persona.preset.label()
    );
    if let Err(error) = coordinator.initialize() {
        println!(
            "[set model.path in {} or LUMEN_MODEL__PATH, then run /init: {error}]",
            settings.config_path().display()
        );
    }

    let mut session = Session {
        coordinator,
        settings,
        listed: Vec::new(),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
        stage: "app-read-line",
    })? {
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        if command == Command::Quit {
            break;
        }
        if let Err(error) = session.execute(command) {
            println!("[error] {error}");
        }
    }

    session.coordinator.cancel();
    printer.abort();
    Ok(())
}
