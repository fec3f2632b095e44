//! Event store
//!
//! Insert and read queries over the `events` table. There is deliberately no
//! update or delete here; the table's triggers reject both anyway.

use super::StoredEvent;
use crate::db::{
    parse_column, parse_datetime, timestamp, ConversationContext, Database, DbError, DbResult,
};
use crate::state_machine::EventType;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

const EVENT_COLUMNS: &str =
    "id, conversation_id, tenant_id, type, payload, correlation_id, idempotency_key, created_at";

/// An event about to be appended
pub(super) struct NewEvent<'a> {
    pub event_type: EventType,
    pub payload: &'a Value,
    pub correlation_id: &'a str,
    pub idempotency_key: Option<&'a str>,
}

/// Insert one event and return its stored form
pub(super) fn append(
    conn: &Connection,
    ctx: &ConversationContext,
    new: &NewEvent<'_>,
) -> DbResult<StoredEvent> {
    let created_at = timestamp(&Utc::now());
    conn.execute(
        "INSERT INTO events (conversation_id, tenant_id, type, payload, correlation_id,
            idempotency_key, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            ctx.conversation_id,
            ctx.tenant_id,
            new.event_type.as_str(),
            serde_json::to_string(new.payload)?,
            new.correlation_id,
            new.idempotency_key,
            created_at,
        ],
    )?;

    Ok(StoredEvent::from_parts(
        conn.last_insert_rowid(),
        ctx.conversation_id.clone(),
        ctx.tenant_id.clone(),
        new.event_type,
        new.payload.clone(),
        new.correlation_id.to_string(),
        new.idempotency_key.map(str::to_string),
        parse_datetime(&created_at),
    ))
}

pub(super) fn find_by_key(
    conn: &Connection,
    conversation_id: &str,
    key: &str,
) -> DbResult<Option<StoredEvent>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE conversation_id = ?1 AND idempotency_key = ?2"
    );
    conn.query_row(&sql, params![conversation_id, key], parse_event_row)
        .optional()
        .map_err(DbError::from)
}

/// Every event of a conversation in id order
pub(crate) fn events_for_conversation(
    conn: &Connection,
    conversation_id: &str,
) -> DbResult<Vec<StoredEvent>> {
    let sql =
        format!("SELECT {EVENT_COLUMNS} FROM events WHERE conversation_id = ?1 ORDER BY id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![conversation_id], parse_event_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
}

fn parse_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEvent> {
    let payload_str: String = row.get(4)?;
    let payload: Value = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredEvent::from_parts(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        parse_column(3, &row.get::<_, String>(3)?)?,
        payload,
        row.get(5)?,
        row.get(6)?,
        parse_datetime(&row.get::<_, String>(7)?),
    ))
}

impl Database {
    pub fn find_event_by_key(
        &self,
        conversation_id: &str,
        key: &str,
    ) -> DbResult<Option<StoredEvent>> {
        let conn = self.lock()?;
        find_by_key(&conn, conversation_id, key)
    }

    /// Events of one conversation with `id > after_id`, ascending, at most `limit`.
    ///
    /// Scoped by tenant as well as conversation so a stream can never read
    /// another tenant's log.
    pub fn events_after(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        after_id: i64,
        limit: usize,
    ) -> DbResult<Vec<StoredEvent>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE tenant_id = ?1 AND conversation_id = ?2 AND id > ?3
             ORDER BY id ASC LIMIT ?4"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![tenant_id, conversation_id, after_id, limit],
            parse_event_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    #[cfg(test)]
    pub fn conversation_events(&self, conversation_id: &str) -> DbResult<Vec<StoredEvent>> {
        let conn = self.lock()?;
        events_for_conversation(&conn, conversation_id)
    }

    /// Highest event id logged for a conversation, 0 when empty
    #[cfg(test)]
    pub fn latest_event_id(&self, conversation_id: &str) -> DbResult<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM events WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )
        .map_err(DbError::from)
    }
}
