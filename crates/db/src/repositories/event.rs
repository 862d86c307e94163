use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use perch_core::domain::entity::{EventRecord, EventSubject};

use super::{column, timestamp, EventRepository, RepositoryError};
use crate::DbPool;

/// Appends raw chat events to the per-entity event logs.
pub struct SqlEventRepository {
    pool: DbPool,
}

impl SqlEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn table_for(subject: EventSubject) -> (&'static str, &'static str, i64) {
    match subject {
        EventSubject::Server(id) => ("server_event", "server_id", id.0),
        EventSubject::User(id) => ("user_event", "user_id", id.0),
        EventSubject::Channel(id) => ("channel_event", "channel_id", id.0),
    }
}

fn record_from_row(row: &SqliteRow, subject: EventSubject) -> Result<EventRecord, RepositoryError> {
    let raw: String = column(row, "event")?;
    let event = serde_json::from_str(&raw)
        .map_err(|e| RepositoryError::Decode(format!("event: {e}")))?;
    Ok(EventRecord { id: column(row, "id")?, created_at: timestamp(row, "created_at")?, subject, event })
}

#[async_trait]
impl EventRepository for SqlEventRepository {
    async fn append(
        &self,
        subject: EventSubject,
        event: serde_json::Value,
    ) -> Result<EventRecord, RepositoryError> {
        let (table, key, id) = table_for(subject);
        let created_at = Utc::now();
        let result = sqlx::query(&format!(
            "INSERT INTO {table} ({key}, event, created_at) VALUES (?, ?, ?)"
        ))
        .bind(id)
        .bind(event.to_string())
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(EventRecord { id: result.last_insert_rowid(), created_at, subject, event })
    }

    async fn list(&self, subject: EventSubject) -> Result<Vec<EventRecord>, RepositoryError> {
        let (table, key, id) = table_for(subject);
        let rows = sqlx::query(&format!(
            "SELECT id, event, created_at FROM {table} WHERE {key} = ? ORDER BY id ASC"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| record_from_row(row, subject)).collect()
    }
}
