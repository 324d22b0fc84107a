use chrono::{DateTime, Local, Utc};

use super::ids::{MessageId, SessionId};

/// Number of words kept when a session is summarized from its first user turn.
const SUMMARY_WORD_LIMIT: usize = 5;

/// Storage-local sender kind, intentionally decoupled from chat-layer sender enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderKind {
    User,
    Assistant,
    Info,
    Error,
}

impl SenderKind {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Info => "info",
            Self::Error => "error",
        }
    }

    pub(crate) fn from_sql(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "info" => Some(Self::Info),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Ordering applied by [`crate::SessionStore::list_sessions`].
///
/// Sessions are always sorted newest-modified first; `pinned_first` lifts
/// pinned sessions above the rest while keeping recency inside each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOrder {
    pub pinned_first: bool,
}

impl SessionOrder {
    pub fn recency() -> Self {
        Self {
            pinned_first: false,
        }
    }

    pub fn pinned_first() -> Self {
        Self { pinned_first: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub pinned: bool,
    pub custom_title: Option<String>,
}

impl SessionRecord {
    /// Display title: the custom title when it is not blank, else the last-modified time.
    pub fn title(&self) -> String {
        if let Some(custom_title) = &self.custom_title
            && !custom_title.trim().is_empty()
        {
            return custom_title.trim().to_string();
        }

        self.last_modified_at
            .with_timezone(&Local)
            .format("%b %-d, %Y, %-I:%M %p")
            .to_string()
    }

    /// Short title built from the first user message, falling back to [`Self::title`].
    pub fn summary_title(&self, messages: &[MessageRecord]) -> String {
        let Some(first_user_message) = messages
            .iter()
            .find(|message| message.sender == SenderKind::User)
        else {
            return self.title();
        };

        let words = first_user_message.text.split_whitespace().collect::<Vec<_>>();
        if words.is_empty() {
            return self.title();
        }

        let summary = words
            .iter()
            .take(SUMMARY_WORD_LIMIT)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if words.len() > SUMMARY_WORD_LIMIT {
            format!("{summary}...")
        } else {
            summary
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewSession {
    pub custom_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionPatch {
    pub pinned: Option<bool>,
    /// `Some(None)` clears the custom title, `None` leaves it untouched.
    pub custom_title: Option<Option<String>>,
}

impl SessionPatch {
    pub fn pin(pinned: bool) -> Self {
        Self {
            pinned: Some(pinned),
            custom_title: None,
        }
    }

    pub fn rename(custom_title: Option<String>) -> Self {
        let custom_title = custom_title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
        Self {
            pinned: None,
            custom_title: Some(custom_title),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: SessionId,
    pub seq: u64,
    pub sender: SenderKind,
    /// Only meaningful for [`SenderKind::Error`].
    pub critical: bool,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertMessage {
    pub id: MessageId,
    pub sender: SenderKind,
    pub critical: bool,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Current time truncated to the microsecond precision the stores persist.
pub fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}
