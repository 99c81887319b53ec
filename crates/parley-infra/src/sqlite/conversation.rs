//! SQLite conversation repository implementation.
//!
//! Implements `ConversationRepository` from `parley-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, reader pool for lookups,
//! writer pool (single connection) for creates and saves.
//!
//! A conversation is one header row in `conversations` plus one row per
//! message in `conversation_messages`. Messages are immutable once written;
//! a save only inserts new messages and flips the `erased` flag of evicted ones.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use parley_core::chat::conversation::Conversation;
use parley_core::chat::repository::ConversationRepository;
use parley_types::chat::{
    ChatMessage, ConversationConfig, ConversationSnapshot, ConversationStatus, ConversationSummary,
    ModelProfile,
};
use parley_types::error::RepositoryError;
use parley_types::llm::MessageRole;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

/// Internal row type for the `conversations` header table.
struct ConversationRow {
    id: String,
    user_id: String,
    status: String,
    model: String,
    model_max_tokens: i64,
    temperature: f64,
    top_p: f64,
    n: i64,
    stop: String,
    max_tokens: i64,
    presence_penalty: f64,
    frequency_penalty: f64,
    token_usage: i64,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            model: row.try_get("model")?,
            model_max_tokens: row.try_get("model_max_tokens")?,
            temperature: row.try_get("temperature")?,
            top_p: row.try_get("top_p")?,
            n: row.try_get("n")?,
            stop: row.try_get("stop")?,
            max_tokens: row.try_get("max_tokens")?,
            presence_penalty: row.try_get("presence_penalty")?,
            frequency_penalty: row.try_get("frequency_penalty")?,
            token_usage: row.try_get("token_usage")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn parse_id(&self) -> Result<Uuid, RepositoryError> {
        Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation id: {e}")))
    }

    fn parse_status(&self) -> Result<ConversationStatus, RepositoryError> {
        self.status
            .parse()
            .map_err(|e: parley_types::error::ValidationError| {
                RepositoryError::Query(e.to_string())
            })
    }

    fn into_summary(self) -> Result<ConversationSummary, RepositoryError> {
        Ok(ConversationSummary {
            id: self.parse_id()?,
            status: self.parse_status()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            user_id: self.user_id,
            model: self.model,
            token_usage: self.token_usage as u32,
        })
    }

    fn into_snapshot(
        self,
        messages: Vec<MessageRow>,
    ) -> Result<ConversationSnapshot, RepositoryError> {
        let id = self.parse_id()?;
        let status = self.parse_status()?;
        let stop: Vec<String> = serde_json::from_str(&self.stop)
            .map_err(|e| RepositoryError::Query(format!("invalid stop sequences: {e}")))?;

        let mut system_message = None;
        let mut active = Vec::new();
        let mut erased = Vec::new();
        for row in messages {
            let (pinned, is_erased) = (row.pinned, row.erased);
            let message = row.into_message()?;
            if pinned {
                system_message = Some(message);
            } else if is_erased {
                erased.push(message);
            } else {
                active.push(message);
            }
        }
        let system_message = system_message.ok_or_else(|| {
            RepositoryError::Query(format!("conversation {id} has no system message"))
        })?;

        Ok(ConversationSnapshot {
            id,
            user_id: self.user_id,
            status,
            system_message,
            messages: active,
            erased_messages: erased,
            token_usage: self.token_usage as u32,
            config: ConversationConfig {
                model: ModelProfile::new(self.model, self.model_max_tokens as u32),
                temperature: self.temperature as f32,
                top_p: self.top_p as f32,
                n: self.n as u32,
                stop,
                max_tokens: self.max_tokens as u32,
                presence_penalty: self.presence_penalty as f32,
                frequency_penalty: self.frequency_penalty as f32,
            },
            version: self.version as u64,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// Internal row type for `conversation_messages`.
struct MessageRow {
    id: String,
    role: String,
    content: String,
    token_count: i64,
    pinned: bool,
    erased: bool,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            token_count: row.try_get("token_count")?,
            pinned: row.try_get("pinned")?,
            erased: row.try_get("erased")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let created_at = parse_datetime(&self.created_at)?;

        Ok(ChatMessage::from_parts(
            id,
            role,
            self.content,
            self.token_count as u32,
            created_at,
        ))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

/// Insert any messages not yet stored and mark evicted ones as erased.
///
/// `seq` is the position in `[system, erased.., active..]`. FIFO eviction
/// only ever moves the head of the active list to the tail of the erased
/// list, so a message keeps its `seq` across saves.
async fn upsert_messages(
    conn: &mut sqlx::SqliteConnection,
    snapshot: &ConversationSnapshot,
) -> Result<(), RepositoryError> {
    let rows = std::iter::once((&snapshot.system_message, true, false))
        .chain(snapshot.erased_messages.iter().map(|m| (m, false, true)))
        .chain(snapshot.messages.iter().map(|m| (m, false, false)));

    for (seq, (message, pinned, erased)) in rows.enumerate() {
        sqlx::query(
            r#"INSERT INTO conversation_messages (id, conversation_id, seq, role, content, token_count, pinned, erased, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET erased = excluded.erased"#,
        )
        .bind(message.id().to_string())
        .bind(snapshot.id.to_string())
        .bind(seq as i64)
        .bind(message.role().to_string())
        .bind(message.content())
        .bind(message.token_count() as i64)
        .bind(pinned)
        .bind(erased)
        .bind(format_datetime(&message.created_at()))
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteConversationRepository {
    async fn find(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        // One read transaction so the header and messages come from the same snapshot.
        let mut tx = self.pool.reader.begin().await.map_err(query_error)?;

        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let header = ConversationRow::from_row(&row).map_err(query_error)?;

        let message_rows =
            sqlx::query("SELECT * FROM conversation_messages WHERE conversation_id = ? ORDER BY seq")
                .bind(id.to_string())
                .fetch_all(&mut *tx)
                .await
                .map_err(query_error)?;
        tx.commit().await.map_err(query_error)?;

        let mut messages = Vec::with_capacity(message_rows.len());
        for row in &message_rows {
            messages.push(MessageRow::from_row(row).map_err(query_error)?);
        }

        let snapshot = header.into_snapshot(messages)?;
        let conversation = Conversation::restore(snapshot)
            .map_err(|e| RepositoryError::Query(format!("corrupt conversation {id}: {e}")))?;
        Ok(Some(conversation))
    }

    async fn create(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let snapshot = conversation.snapshot();
        let stop = serde_json::to_string(&snapshot.config.stop)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO conversations (id, user_id, status, model, model_max_tokens, temperature, top_p, n, stop, max_tokens, presence_penalty, frequency_penalty, token_usage, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(snapshot.id.to_string())
        .bind(&snapshot.user_id)
        .bind(snapshot.status.to_string())
        .bind(&snapshot.config.model.name)
        .bind(snapshot.config.model.max_tokens as i64)
        .bind(snapshot.config.temperature as f64)
        .bind(snapshot.config.top_p as f64)
        .bind(snapshot.config.n as i64)
        .bind(stop)
        .bind(snapshot.config.max_tokens as i64)
        .bind(snapshot.config.presence_penalty as f64)
        .bind(snapshot.config.frequency_penalty as f64)
        .bind(snapshot.token_usage as i64)
        .bind(snapshot.version as i64)
        .bind(format_datetime(&snapshot.created_at))
        .bind(format_datetime(&snapshot.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "conversation {} already exists",
                        snapshot.id
                    ));
                }
            }
            query_error(e)
        })?;

        upsert_messages(&mut tx, &snapshot).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn save(&self, conversation: &Conversation) -> Result<u64, RepositoryError> {
        let snapshot = conversation.snapshot();
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            r#"UPDATE conversations
               SET status = ?, token_usage = ?, version = version + 1, updated_at = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(snapshot.status.to_string())
        .bind(snapshot.token_usage as i64)
        .bind(format_datetime(&snapshot.updated_at))
        .bind(snapshot.id.to_string())
        .bind(snapshot.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            let stored: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM conversations WHERE id = ?")
                    .bind(snapshot.id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(query_error)?;
            return Err(match stored {
                None => RepositoryError::NotFound,
                Some((version,)) => RepositoryError::Conflict(format!(
                    "conversation {} is at version {version}, expected {}",
                    snapshot.id, snapshot.version
                )),
            });
        }

        upsert_messages(&mut tx, &snapshot).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(snapshot.version + 1)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        // LIMIT -1 means no limit in SQLite.
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE user_id = ? ORDER BY updated_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let conversation_row = ConversationRow::from_row(row).map_err(query_error)?;
            summaries.push(conversation_row.into_summary()?);
        }

        Ok(summaries)
    }
}
