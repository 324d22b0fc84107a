use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection};

use super::error::{
    ConflictSnafu, InvariantViolationSnafu, NotFoundSnafu, SqliteQuerySnafu,
    SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageError,
};
use super::error::{
    CreateSqliteDirectorySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, StorageResult,
};
use super::ids::{MessageId, SessionId};
use super::types::{
    MessageRecord, NewSession, SenderKind, SessionOrder, SessionPatch, SessionRecord,
    UpsertMessage, timestamp_now,
};
use super::{MessageStore, SessionStore};

const SESSION_COLUMNS: &str = "id, started_at, last_modified_at, pinned, custom_title";
const MESSAGE_COLUMNS: &str = "id, session_id, seq, sender, critical, text, created_at";

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        // Bootstrap only; every store call opens its own connection.
        pool.close().await;

        tracing::debug!(database_url = %database_url, "sqlite conversation store ready");
        Ok(Self { database_url })
    }

    /// Blocking variant of [`Self::open`] for callers outside any async runtime.
    pub fn open_blocking(database_location: &str) -> StorageResult<Self> {
        let database_location = database_location.to_string();
        run_on_worker("sqlite-open", async move { Self::open(&database_location).await })
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        run_on_worker(stage, op)
    }
}

// Store traits are sync, so each call executes on a dedicated worker thread
// with its own current-thread runtime to avoid nested-runtime blocking panics.
fn run_on_worker<T, F>(stage: &'static str, op: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: Future<Output = StorageResult<T>> + Send + 'static,
{
    let worker = std::thread::Builder::new()
        .name(format!("sqlite-store-{stage}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context(SqliteRuntimeInitSnafu {
                    stage: "sqlite-store-runtime-build",
                })?;
            runtime.block_on(op)
        })
        .context(SqliteThreadSpawnSnafu {
            stage: "sqlite-store-spawn-worker",
        })?;

    match worker.join() {
        Ok(result) => result,
        Err(_) => InvariantViolationSnafu {
            stage,
            details: "sqlite storage worker thread panicked".to_string(),
        }
        .fail(),
    }
}

impl SessionStore for SqliteStorage {
    fn create_session(&self, input: NewSession) -> StorageResult<SessionRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-create", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-create-connect").await?;
            let session_id = SessionId::generate();
            let now = timestamp_now();
            let custom_title = input
                .custom_title
                .map(|title| title.trim().to_string())
                .filter(|title| !title.is_empty());

            sqlx::query(
                "INSERT INTO sessions (id, started_at, last_modified_at, pinned, custom_title) VALUES (?, ?, ?, 0, ?)",
            )
            .bind(session_id.to_sql())
            .bind(now.timestamp_micros())
            .bind(now.timestamp_micros())
            .bind(custom_title.clone())
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-create-insert",
            })?;

            Ok(SessionRecord {
                id: session_id,
                started_at: now,
                last_modified_at: now,
                pinned: false,
                custom_title,
            })
        })
    }

    fn list_sessions(&self, order: SessionOrder) -> StorageResult<Vec<SessionRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-list", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-list-connect").await?;
            let order_clause = if order.pinned_first {
                "ORDER BY pinned DESC, last_modified_at DESC, id DESC"
            } else {
                "ORDER BY last_modified_at DESC, id DESC"
            };
            let rows = sqlx::query_as::<_, SessionRow>(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions {order_clause}"
            ))
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-list-query",
            })?;

            rows.into_iter().map(session_row_to_record).collect()
        })
    }

    fn get_session(&self, session_id: SessionId) -> StorageResult<Option<SessionRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-get", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-get-connect").await?;
            load_session_row(&mut connection, session_id, "session-get-query")
                .await?
                .map(session_row_to_record)
                .transpose()
        })
    }

    fn update_session(
        &self,
        session_id: SessionId,
        patch: SessionPatch,
    ) -> StorageResult<SessionRecord> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-update", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-update-connect").await?;
            let now = timestamp_now();
            let (title_is_patched, custom_title) = match patch.custom_title {
                Some(custom_title) => (true, custom_title),
                None => (false, None),
            };

            let update_result = sqlx::query(
                "UPDATE sessions SET pinned = COALESCE(?, pinned), custom_title = CASE WHEN ? THEN ? ELSE custom_title END, last_modified_at = ? WHERE id = ?",
            )
            .bind(patch.pinned)
            .bind(title_is_patched)
            .bind(custom_title)
            .bind(now.timestamp_micros())
            .bind(session_id.to_sql())
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-update-apply",
            })?;

            if update_result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "session-update-missing",
                    entity: "session",
                    id: session_id.to_string(),
                }
                .fail();
            }

            let row = load_session_row(&mut connection, session_id, "session-update-load")
                .await?
                .context(NotFoundSnafu {
                    stage: "session-update-load-missing",
                    entity: "session",
                    id: session_id.to_string(),
                })?;

            session_row_to_record(row)
        })
    }

    fn delete_session(&self, session_id: SessionId) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-delete", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-delete-connect").await?;
            // Messages go with the session through ON DELETE CASCADE.
            let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(session_id.to_sql())
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "session-delete-apply",
                })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "session-delete-missing",
                    entity: "session",
                    id: session_id.to_string(),
                }
                .fail();
            }

            Ok(())
        })
    }
}

impl MessageStore for SqliteStorage {
    fn upsert_message(&self, session_id: SessionId, input: UpsertMessage) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-upsert", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-upsert-connect").await?;
            let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                stage: "message-upsert-begin",
            })?;

            let session_exists =
                sqlx::query_scalar::<_, i64>("SELECT 1 FROM sessions WHERE id = ? LIMIT 1")
                    .bind(session_id.to_sql())
                    .fetch_optional(&mut *tx)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "message-upsert-load-session",
                    })?
                    .is_some();
            if !session_exists {
                return NotFoundSnafu {
                    stage: "message-upsert-session-missing",
                    entity: "session",
                    id: session_id.to_string(),
                }
                .fail();
            }

            // New ids take the next seq; known ids keep their position and only
            // change sender and text. An id owned by another session is left alone.
            let result = sqlx::query(
                "INSERT INTO messages (id, session_id, seq, sender, critical, text, created_at) \
                 VALUES (?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE session_id = ?), ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET sender = excluded.sender, critical = excluded.critical, text = excluded.text \
                 WHERE messages.session_id = excluded.session_id",
            )
            .bind(input.id.to_sql())
            .bind(session_id.to_sql())
            .bind(session_id.to_sql())
            .bind(input.sender.as_sql())
            .bind(input.critical)
            .bind(input.text)
            .bind(input.created_at.timestamp_micros())
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-upsert-apply",
            })?;

            if result.rows_affected() == 0 {
                return ConflictSnafu {
                    stage: "message-upsert-foreign-session",
                    entity: "message",
                    details: format!(
                        "message '{}' already belongs to another session",
                        input.id
                    ),
                }
                .fail();
            }

            sqlx::query("UPDATE sessions SET last_modified_at = ? WHERE id = ?")
                .bind(timestamp_now().timestamp_micros())
                .bind(session_id.to_sql())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-upsert-touch-session",
                })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-upsert-commit",
            })?;

            Ok(())
        })
    }

    fn list_messages(&self, session_id: SessionId) -> StorageResult<Vec<MessageRecord>> {
        let database_url = self.database_url.clone();
        self.run_db_call("message-list", async move {
            let mut connection =
                connect_store_connection(&database_url, "message-list-connect").await?;
            let rows = sqlx::query_as::<_, MessageRow>(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ? ORDER BY seq ASC, id ASC"
            ))
            .bind(session_id.to_sql())
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    started_at: i64,
    last_modified_at: i64,
    pinned: bool,
    custom_title: Option<String>,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    seq: i64,
    sender: String,
    critical: bool,
    text: String,
    created_at: i64,
}

fn session_row_to_record(row: SessionRow) -> StorageResult<SessionRecord> {
    Ok(SessionRecord {
        id: SessionId::parse(&row.id)?,
        started_at: micros_to_timestamp(row.started_at, "session-row-started-at")?,
        last_modified_at: micros_to_timestamp(row.last_modified_at, "session-row-last-modified")?,
        pinned: row.pinned,
        custom_title: row.custom_title,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        session_id: SessionId::parse(&row.session_id)?,
        seq: i64_to_u64(row.seq, "message-row-seq")?,
        sender: sender_from_sql(&row.sender)?,
        critical: row.critical,
        text: row.text,
        created_at: micros_to_timestamp(row.created_at, "message-row-created-at")?,
    })
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-foreign-keys",
            pragma: "foreign_keys",
        })?;
    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

async fn load_session_row(
    connection: &mut SqliteConnection,
    session_id: SessionId,
    stage: &'static str,
) -> StorageResult<Option<SessionRow>> {
    sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
    ))
    .bind(session_id.to_sql())
    .fetch_optional(&mut *connection)
    .await
    .context(SqliteQuerySnafu { stage })
}

fn sender_from_sql(raw: &str) -> StorageResult<SenderKind> {
    SenderKind::from_sql(raw).context(InvariantViolationSnafu {
        stage: "message-sender-from-sql",
        details: format!("unknown message sender '{raw}'"),
    })
}

fn micros_to_timestamp(value: i64, stage: &'static str) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value).context(InvariantViolationSnafu {
        stage,
        details: format!("sqlite timestamp '{value}' is out of range"),
    })
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn open_store() -> (TempDir, SqliteStorage) {
        let directory = tempfile::tempdir().expect("temp dir");
        let path = directory.path().join("nested").join("conversations.db");
        let store = SqliteStorage::open_blocking(&path.display().to_string())
            .expect("sqlite store opens");
        (directory, store)
    }

    fn upsert(id: MessageId, sender: SenderKind, text: &str) -> UpsertMessage {
        UpsertMessage {
            id,
            sender,
            critical: false,
            text: text.to_string(),
            created_at: timestamp_now(),
        }
    }

    #[test]
    fn upsert_inserts_then_overwrites_in_place() {
        let (_directory, store) = open_store();
        let session = store
            .create_session(NewSession::default())
            .expect("create session");

        let user_id = MessageId::generate();
        let reply_id = MessageId::generate();
        store
            .upsert_message(session.id, upsert(user_id, SenderKind::User, "hello"))
            .expect("insert user");
        store
            .upsert_message(session.id, upsert(reply_id, SenderKind::Assistant, "partial"))
            .expect("insert reply");
        store
            .upsert_message(
                session.id,
                upsert(reply_id, SenderKind::Info, "partial\n(Stopped by user)"),
            )
            .expect("overwrite reply");
        store
            .upsert_message(
                session.id,
                upsert(reply_id, SenderKind::Info, "partial\n(Stopped by user)"),
            )
            .expect("repeat overwrite");

        let messages = store.list_messages(session.id).expect("list messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, user_id);
        assert_eq!(messages[0].seq, 1);
        assert_eq!(messages[1].id, reply_id);
        assert_eq!(messages[1].seq, 2);
        assert_eq!(messages[1].sender, SenderKind::Info);
        assert_eq!(messages[1].text, "partial\n(Stopped by user)");
    }

    #[test]
    fn upsert_into_missing_session_is_not_found() {
        let (_directory, store) = open_store();
        let error = store
            .upsert_message(
                SessionId::generate(),
                upsert(MessageId::generate(), SenderKind::User, "orphan"),
            )
            .expect_err("missing session must fail");
        assert!(matches!(error, StorageError::NotFound { entity: "session", .. }));
    }

    #[test]
    fn upsert_rejects_message_owned_by_another_session() {
        let (_directory, store) = open_store();
        let first = store.create_session(NewSession::default()).expect("first");
        let second = store.create_session(NewSession::default()).expect("second");
        let message_id = MessageId::generate();

        store
            .upsert_message(first.id, upsert(message_id, SenderKind::User, "mine"))
            .expect("insert");
        let error = store
            .upsert_message(second.id, upsert(message_id, SenderKind::User, "stolen"))
            .expect_err("cross-session upsert must fail");
        assert!(matches!(error, StorageError::Conflict { .. }));
        assert_eq!(store.list_messages(first.id).expect("list")[0].text, "mine");
    }

    #[test]
    fn pinned_sessions_sort_first_and_delete_cascades() {
        let (_directory, store) = open_store();
        let older = store.create_session(NewSession::default()).expect("older");
        std::thread::sleep(Duration::from_millis(5));
        let newer = store.create_session(NewSession::default()).expect("newer");

        std::thread::sleep(Duration::from_millis(5));
        let pinned = store
            .update_session(older.id, SessionPatch::pin(true))
            .expect("pin");
        assert!(pinned.pinned);

        std::thread::sleep(Duration::from_millis(5));
        store
            .upsert_message(
                newer.id,
                upsert(MessageId::generate(), SenderKind::User, "fresh activity"),
            )
            .expect("touch newer");
        store
            .upsert_message(
                older.id,
                upsert(MessageId::generate(), SenderKind::User, "kept until delete"),
            )
            .expect("insert into older");
        std::thread::sleep(Duration::from_millis(5));
        store
            .upsert_message(
                newer.id,
                upsert(MessageId::generate(), SenderKind::Assistant, "latest"),
            )
            .expect("touch newer again");

        let ids = |order| {
            store
                .list_sessions(order)
                .expect("list sessions")
                .into_iter()
                .map(|session| session.id)
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(SessionOrder::recency()), vec![newer.id, older.id]);
        assert_eq!(ids(SessionOrder::pinned_first()), vec![older.id, newer.id]);

        store.delete_session(older.id).expect("delete");
        assert!(store.get_session(older.id).expect("get").is_none());
        assert!(store.list_messages(older.id).expect("list").is_empty());
        assert!(matches!(
            store.delete_session(older.id),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn rename_sets_and_clears_custom_title() {
        let (_directory, store) = open_store();
        let session = store.create_session(NewSession::default()).expect("create");

        let renamed = store
            .update_session(session.id, SessionPatch::rename(Some("Garden".to_string())))
            .expect("rename");
        assert_eq!(renamed.custom_title.as_deref(), Some("Garden"));
        assert_eq!(renamed.title(), "Garden");

        let pinned = store
            .update_session(session.id, SessionPatch::pin(true))
            .expect("pin keeps title");
        assert_eq!(pinned.custom_title.as_deref(), Some("Garden"));

        let cleared = store
            .update_session(session.id, SessionPatch::rename(None))
            .expect("clear");
        assert_eq!(cleared.custom_title, None);
        assert!(cleared.last_modified_at >= session.last_modified_at);
    }

    #[test]
    fn repeated_upserts_round_trip_through_reopen() {
        let directory = tempfile::tempdir().expect("temp dir");
        let path = directory.path().join("conversations.db").display().to_string();
        let asked_at =
            DateTime::from_timestamp_micros(1_760_000_000_123_456).expect("valid timestamp");
        let replied_at =
            DateTime::from_timestamp_micros(1_760_000_004_654_321).expect("valid timestamp");
        let user_id = MessageId::generate();
        let reply_id = MessageId::generate();

        let (session_id, before_close) = {
            let store = SqliteStorage::open_blocking(&path).expect("open");
            let session = store.create_session(NewSession::default()).expect("create");
            store
                .upsert_message(
                    session.id,
                    UpsertMessage {
                        id: user_id,
                        sender: SenderKind::User,
                        critical: false,
                        text: "why is the sky blue?".to_string(),
                        created_at: asked_at,
                    },
                )
                .expect("insert user");
            for (sender, critical, text) in [
                (SenderKind::Assistant, false, "Rayleigh"),
                (SenderKind::Assistant, false, "Rayleigh scattering"),
                (
                    SenderKind::Error,
                    true,
                    "Rayleigh scattering\n\nError: gpu lost",
                ),
            ] {
                store
                    .upsert_message(
                        session.id,
                        UpsertMessage {
                            id: reply_id,
                            sender,
                            critical,
                            text: text.to_string(),
                            created_at: replied_at,
                        },
                    )
                    .expect("upsert reply");
            }
            let listed = store.list_messages(session.id).expect("list");
            (session.id, listed)
        };

        let reopened = SqliteStorage::open_blocking(&path).expect("reopen");
        let after_reopen = reopened.list_messages(session_id).expect("list");
        assert_eq!(after_reopen, before_close);
        assert_eq!(
            after_reopen,
            vec![
                MessageRecord {
                    id: user_id,
                    session_id,
                    seq: 1,
                    sender: SenderKind::User,
                    critical: false,
                    text: "why is the sky blue?".to_string(),
                    created_at: asked_at,
                },
                MessageRecord {
                    id: reply_id,
                    session_id,
                    seq: 2,
                    sender: SenderKind::Error,
                    critical: true,
                    text: "Rayleigh scattering\n\nError: gpu lost".to_string(),
                    created_at: replied_at,
                },
            ]
        );
    }

    #[test]
    fn data_survives_reopen() {
        let directory = tempfile::tempdir().expect("temp dir");
        let path = directory.path().join("conversations.db").display().to_string();
        let session_id = {
            let store = SqliteStorage::open_blocking(&path).expect("open");
            let session = store.create_session(NewSession::default()).expect("create");
            store
                .upsert_message(
                    session.id,
                    upsert(MessageId::generate(), SenderKind::User, "remember me"),
                )
                .expect("insert");
            session.id
        };

        let reopened = SqliteStorage::open_blocking(&path).expect("reopen");
        let messages = reopened.list_messages(session_id).expect("list");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "remember me");
    }
}
