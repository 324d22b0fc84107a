use lumen_engine::WorkerError;

use crate::chat::events::OutcomeKind;
use crate::chat::message::{Message, Sender};

pub const EMPTY_RESPONSE_TEXT: &str = "(no response produced)";
pub const STOPPED_SUFFIX: &str = "\n(Stopped by user)";

/// Terminal state of one fragment stream.
#[derive(Debug)]
pub enum GenerationOutcome {
    Completed,
    Cancelled,
    Failed(WorkerError),
}

impl GenerationOutcome {
    /// Maps the worker's terminal item; `None` means the stream ended normally.
    pub fn from_stream_end(error: Option<WorkerError>) -> Self {
        match error {
            None => Self::Completed,
            Some(error) if error.is_cancelled() => Self::Cancelled,
            Some(error) => Self::Failed(error),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Completed => OutcomeKind::Completed,
            Self::Cancelled => OutcomeKind::Cancelled,
            Self::Failed(_) => OutcomeKind::Failed,
        }
    }

    /// Final form of the placeholder given the accumulated `text`.
    ///
    /// Returns `None` when the placeholder should be removed from the conversation.
    /// Identity and timestamp of the placeholder are preserved.
    pub fn finalize_placeholder(&self, placeholder: &Message, text: &str) -> Option<Message> {
        let (sender, text) = match self {
            Self::Completed if text.trim().is_empty() => {
                (Sender::Info, EMPTY_RESPONSE_TEXT.to_string())
            }
            Self::Completed => (Sender::Assistant, text.to_string()),
            Self::Cancelled if text.is_empty() => return None,
            Self::Cancelled => {
                let mut text = text.to_string();
                if !text.ends_with(STOPPED_SUFFIX) {
                    text.push_str(STOPPED_SUFFIX);
                }
                (Sender::Info, text)
            }
            Self::Failed(error) if text.trim().is_empty() => {
                (Sender::Error { critical: true }, format!("Error: {error}"))
            }
            Self::Failed(error) => (
                Sender::Error { critical: true },
                format!("{text}\n\nError: {error}"),
            ),
        };

        Some(Message {
            id: placeholder.id,
            sender,
            text,
            timestamp: placeholder.timestamp,
        })
    }
}
