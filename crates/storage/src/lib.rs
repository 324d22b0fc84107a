pub mod error;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{MessageId, SessionId};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use types::{
    MessageRecord, NewSession, SenderKind, SessionOrder, SessionPatch, SessionRecord,
    UpsertMessage, timestamp_now,
};

/// Durable session bookkeeping.
///
/// All calls are synchronous so the chat coordinator can write through from its
/// publishing domain without awaiting; implementations own their threading.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, input: NewSession) -> StorageResult<SessionRecord>;
    fn list_sessions(&self, order: SessionOrder) -> StorageResult<Vec<SessionRecord>>;
    fn get_session(&self, session_id: SessionId) -> StorageResult<Option<SessionRecord>>;
    fn update_session(
        &self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> StorageResult<SessionRecord>;
    /// Removes the session together with every message it owns.
    fn delete_session(&self, session_id: SessionId) -> StorageResult<()>;
}

pub trait MessageStore: Send + Sync {
    /// Inserts the message when its id is new, otherwise overwrites sender and text.
    ///
    /// Repeating the call with the same payload leaves the store unchanged apart
    /// from the session's last-modified time.
    fn upsert_message(&self, session_id: SessionId, input: UpsertMessage) -> StorageResult<()>;
    fn list_messages(&self, session_id: SessionId) -> StorageResult<Vec<MessageRecord>>;
}

pub trait Storage: SessionStore + MessageStore {}

impl<T> Storage for T where T: SessionStore + MessageStore {}
