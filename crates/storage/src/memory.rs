use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::error::{ConflictSnafu, LockPoisonedSnafu, NotFoundSnafu, StorageResult};
use super::ids::SessionId;
use super::types::{
    MessageRecord, NewSession, SessionOrder, SessionPatch, SessionRecord, UpsertMessage,
    timestamp_now,
};
use super::{MessageStore, SessionStore};

/// Process-local store used when no database is configured and by tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: HashMap<SessionId, SessionRecord>,
    messages: HashMap<SessionId, Vec<MessageRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, stage: &'static str) -> StorageResult<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| LockPoisonedSnafu { stage }.build())
    }
}

impl SessionStore for MemoryStorage {
    fn create_session(&self, input: NewSession) -> StorageResult<SessionRecord> {
        let mut state = self.lock("memory-session-create")?;
        let now = timestamp_now();
        let record = SessionRecord {
            id: SessionId::generate(),
            started_at: now,
            last_modified_at: now,
            pinned: false,
            custom_title: input
                .custom_title
                .map(|title| title.trim().to_string())
                .filter(|title| !title.is_empty()),
        };
        state.sessions.insert(record.id, record.clone());
        state.messages.insert(record.id, Vec::new());
        Ok(record)
    }

    fn list_sessions(&self, order: SessionOrder) -> StorageResult<Vec<SessionRecord>> {
        let state = self.lock("memory-session-list")?;
        let mut sessions = state.sessions.values().cloned().collect::<Vec<_>>();
        sessions.sort_by(|left, right| {
            let pinned = if order.pinned_first {
                right.pinned.cmp(&left.pinned)
            } else {
                std::cmp::Ordering::Equal
            };
            pinned
                .then_with(|| right.last_modified_at.cmp(&left.last_modified_at))
                .then_with(|| right.id.cmp(&left.id))
        });
        Ok(sessions)
    }

    fn get_session(&self, session_id: SessionId) -> StorageResult<Option<SessionRecord>> {
        let state = self.lock("memory-session-get")?;
        Ok(state.sessions.get(&session_id).cloned())
    }

    fn update_session(
        &self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> StorageResult<SessionRecord> {
        let mut state = self.lock("memory-session-update")?;
        let Some(record) = state.sessions.get_mut(&session_id) else {
            return NotFoundSnafu {
                stage: "memory-session-update-missing",
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        };

        if let Some(pinned) = patch.pinned {
            record.pinned = pinned;
        }
        if let Some(custom_title) = patch.custom_title {
            record.custom_title = custom_title;
        }
        record.last_modified_at = timestamp_now();
        Ok(record.clone())
    }

    fn delete_session(&self, session_id: SessionId) -> StorageResult<()> {
        let mut state = self.lock("memory-session-delete")?;
        if state.sessions.remove(&session_id).is_none() {
            return NotFoundSnafu {
                stage: "memory-session-delete-missing",
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        }
        state.messages.remove(&session_id);
        Ok(())
    }
}

impl MessageStore for MemoryStorage {
    fn upsert_message(&self, session_id: SessionId, input: UpsertMessage) -> StorageResult<()> {
        let mut state = self.lock("memory-message-upsert")?;
        if !state.sessions.contains_key(&session_id) {
            return NotFoundSnafu {
                stage: "memory-message-upsert-session-missing",
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        }

        let owned_elsewhere = state
            .messages
            .iter()
            .any(|(owner, messages)| {
                *owner != session_id && messages.iter().any(|message| message.id == input.id)
            });
        if owned_elsewhere {
            return ConflictSnafu {
                stage: "memory-message-upsert-foreign-session",
                entity: "message",
                details: format!("message '{}' already belongs to another session", input.id),
            }
            .fail();
        }

        let messages = state.messages.entry(session_id).or_default();
        if let Some(existing) = messages.iter_mut().find(|message| message.id == input.id) {
            existing.sender = input.sender;
            existing.critical = input.critical;
            existing.text = input.text;
        } else {
            let seq = messages.last().map_or(1, |message| message.seq + 1);
            messages.push(MessageRecord {
                id: input.id,
                session_id,
                seq,
                sender: input.sender,
                critical: input.critical,
                text: input.text,
                created_at: input.created_at,
            });
        }

        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.last_modified_at = timestamp_now();
        }
        Ok(())
    }

    fn list_messages(&self, session_id: SessionId) -> StorageResult<Vec<MessageRecord>> {
        let state = self.lock("memory-message-list")?;
        Ok(state.messages.get(&session_id).cloned().unwrap_or_default())
    }
}
