use chrono::{DateTime, Utc};
use lumen_storage::{MessageId, MessageRecord, SenderKind, UpsertMessage, timestamp_now};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Assistant,
    /// Notices that are part of the transcript but never sent back to the model.
    Info,
    Error { critical: bool },
}

/// One entry of the in-memory conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            sender,
            text: text.into(),
            timestamp: timestamp_now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    /// Empty assistant message standing in for the response being generated.
    pub fn placeholder() -> Self {
        Self::new(Sender::Assistant, String::new())
    }

    pub fn is_placeholder(&self) -> bool {
        self.sender == Sender::Assistant && self.text.is_empty()
    }

    pub fn to_upsert(&self) -> UpsertMessage {
        let (sender, critical) = match self.sender {
            Sender::User => (SenderKind::User, false),
            Sender::Assistant => (SenderKind::Assistant, false),
            Sender::Info => (SenderKind::Info, false),
            Sender::Error { critical } => (SenderKind::Error, critical),
        };
        UpsertMessage {
            id: self.id,
            sender,
            critical,
            text: self.text.clone(),
            created_at: self.timestamp,
        }
    }
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        let sender = match record.sender {
            SenderKind::User => Sender::User,
            SenderKind::Assistant => Sender::Assistant,
            SenderKind::Info => Sender::Info,
            SenderKind::Error => Sender::Error {
                critical: record.critical,
            },
        };
        Self {
            id: record.id,
            sender,
            text: record.text,
            timestamp: record.created_at,
        }
    }
}
