//! SQLite delivery store implementation.
//!
//! Implements `DeliveryStore` from `courier-core`. Message bodies and read
//! receipts are written with `INSERT OR IGNORE`, so a retried attempt or a
//! repeated receipt never produces a second row.

use chrono::{DateTime, Utc};
use courier_core::repository::delivery::DeliveryStore;
use courier_types::chat::ChatMessage;
use courier_types::delivery::ReadReceipt;
use courier_types::error::RepositoryError;
use courier_types::llm::MessageRole;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `DeliveryStore`.
pub struct SqliteDeliveryStore {
    pool: DatabasePool,
}

impl SqliteDeliveryStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ChatMessageRow {
    id: String,
    session_id: String,
    sender_id: String,
    role: String,
    content: String,
    metadata: Option<String>,
    created_at: String,
}

impl ChatMessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            sender_id: row.try_get("sender_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        let role = self
            .role
            .parse::<MessageRole>()
            .map_err(RepositoryError::Query)?;

        Ok(ChatMessage {
            id: parse_uuid(&self.id)?,
            session_id: self.session_id,
            sender_id: self.sender_id,
            role,
            content: self.content,
            created_at: parse_datetime(&self.created_at)?,
            metadata: parse_json(self.metadata.as_deref())?,
        })
    }
}

struct ReadReceiptRow {
    message_id: String,
    reader_id: String,
    session_id: String,
    read_at: String,
    device: Option<String>,
}

impl ReadReceiptRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            message_id: row.try_get("message_id")?,
            reader_id: row.try_get("reader_id")?,
            session_id: row.try_get("session_id")?,
            read_at: row.try_get("read_at")?,
            device: row.try_get("device")?,
        })
    }

    fn into_receipt(self) -> Result<ReadReceipt, RepositoryError> {
        Ok(ReadReceipt {
            message_id: parse_uuid(&self.message_id)?,
            reader_id: self.reader_id,
            session_id: self.session_id,
            read_at: parse_datetime(&self.read_at)?,
            device: parse_json(self.device.as_deref())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json(s: Option<&str>) -> Result<Option<serde_json::Value>, RepositoryError> {
    s.map(serde_json::from_str)
        .transpose()
        .map_err(|e| RepositoryError::Query(format!("invalid JSON column: {e}")))
}

fn to_json(value: Option<&serde_json::Value>) -> Result<Option<String>, RepositoryError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(format!("serialize JSON column: {e}")))
}

// ---------------------------------------------------------------------------
// DeliveryStore impl
// ---------------------------------------------------------------------------

impl DeliveryStore for SqliteDeliveryStore {
    async fn insert_message(&self, message: &ChatMessage) -> Result<(), RepositoryError> {
        let metadata = to_json(message.metadata.as_ref())?;

        sqlx::query(
            r#"INSERT OR IGNORE INTO chat_messages
               (id, session_id, sender_id, role, content, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(&message.session_id)
        .bind(&message.sender_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(&metadata)
        .bind(format_datetime(&message.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn insert_read_receipt(&self, receipt: &ReadReceipt) -> Result<(), RepositoryError> {
        let device = to_json(receipt.device.as_ref())?;

        sqlx::query(
            r#"INSERT OR IGNORE INTO read_receipts
               (message_id, reader_id, session_id, read_at, device)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(receipt.message_id.to_string())
        .bind(&receipt.reader_id)
        .bind(&receipt.session_id)
        .bind(format_datetime(&receipt.read_at))
        .bind(&device)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_message(&self, id: &Uuid) -> Result<Option<ChatMessage>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM chat_messages WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ChatMessageRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_message()?))
            }
            None => Ok(None),
        }
    }

    async fn list_read_receipts(
        &self,
        message_id: &Uuid,
    ) -> Result<Vec<ReadReceipt>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM read_receipts WHERE message_id = ? ORDER BY read_at ASC, reader_id ASC",
        )
        .bind(message_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut receipts = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ReadReceiptRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            receipts.push(r.into_receipt()?);
        }
        Ok(receipts)
    }
}
