//! Database module
//!
//! Provides persistence for tenants, conversations and the read models
//! projected from the event log. The event log itself lives in
//! `event_log::store`, which adds its queries to [`Database`].

mod schema;

pub use schema::*;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid JSON column: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),
    #[error("Valuation not found: {0}")]
    ValuationNotFound(i64),
    #[error("Malformed {event_type} payload on event {event_id}: {reason}")]
    InvalidPayload {
        event_id: i64,
        event_type: String,
        reason: String,
    },
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self::from_connection(conn)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Run `f` inside an immediate (write-locking) transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise.
    pub fn with_transaction<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        let out = f(&tx)?;
        tx.commit().map_err(DbError::from)?;
        Ok(out)
    }

    // ==================== Tenant Operations ====================

    /// Create a tenant (settings management is external; used for seeding)
    pub fn create_tenant(&self, id: &str, name: &str) -> DbResult<Tenant> {
        let conn = self.lock()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id, name, timestamp(&now)],
        )?;
        Ok(Tenant {
            id: id.to_string(),
            name: name.to_string(),
            created_at: parse_datetime(&timestamp(&now)),
        })
    }

    pub fn get_tenant(&self, id: &str) -> DbResult<Tenant> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, created_at FROM tenants WHERE id = ?1",
            params![id],
            |row| {
                Ok(Tenant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()?
        .ok_or_else(|| DbError::TenantNotFound(id.to_string()))
    }

    /// Insert or replace one appraisal question for a tenant
    pub fn upsert_question(&self, tenant_id: &str, question: &TenantQuestion) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tenant_questions
                (tenant_id, key, label, help_text, input_type, required, active, order_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tenant_id, key) DO UPDATE SET
                label = excluded.label, help_text = excluded.help_text,
                input_type = excluded.input_type, required = excluded.required,
                active = excluded.active, order_index = excluded.order_index",
            params![
                tenant_id,
                question.key,
                question.label,
                question.help_text,
                question.input_type,
                question.required,
                question.active,
                question.order_index,
            ],
        )?;
        Ok(())
    }

    /// All questions for a tenant, ascending by order index
    pub fn list_questions(&self, tenant_id: &str) -> DbResult<Vec<TenantQuestion>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, label, help_text, input_type, required, active, order_index
             FROM tenant_questions WHERE tenant_id = ?1 ORDER BY order_index ASC, key ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok(TenantQuestion {
                key: row.get(0)?,
                label: row.get(1)?,
                help_text: row.get(2)?,
                input_type: row.get(3)?,
                required: row.get(4)?,
                active: row.get(5)?,
                order_index: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Conversation Operations ====================

    /// Create a new conversation in the `CHAT` state
    pub fn create_conversation(
        &self,
        id: &str,
        tenant_id: &str,
        session_token_hash: &str,
    ) -> DbResult<Conversation> {
        let conn = self.lock()?;
        let now = timestamp(&Utc::now());
        conn.execute(
            "INSERT INTO conversations (id, tenant_id, session_token_hash, state, last_event_id,
                last_activity_at, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![id, tenant_id, session_token_hash, ConvState::Chat.as_str(), now],
        )?;
        query_conversation(&conn, id)
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.lock()?;
        query_conversation(&conn, id)
    }

    /// Look up the conversation a hashed session token belongs to, scoped to a tenant
    pub fn find_conversation_by_token(
        &self,
        tenant_id: &str,
        session_token_hash: &str,
    ) -> DbResult<Option<Conversation>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE tenant_id = ?1 AND session_token_hash = ?2"
        );
        conn.query_row(&sql, params![tenant_id, session_token_hash], parse_conversation_row)
            .optional()
            .map_err(DbError::from)
    }

    // ==================== Message Operations ====================

    /// Transcript for a conversation, oldest first
    pub fn list_messages(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, tenant_id, event_id, role, text, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY event_id ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Valuation Operations ====================

    pub fn get_valuation(&self, id: i64) -> DbResult<Valuation> {
        let conn = self.lock()?;
        query_valuation(&conn, id)?.ok_or(DbError::ValuationNotFound(id))
    }

    pub fn list_valuations(&self, conversation_id: &str) -> DbResult<Vec<Valuation>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {VALUATION_COLUMNS} FROM valuations WHERE conversation_id = ?1 ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![conversation_id], parse_valuation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// The valuation already requested for this snapshot, if any
    pub fn find_valuation_by_hash(
        &self,
        conversation_id: &str,
        snapshot_hash: &str,
    ) -> DbResult<Option<Valuation>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {VALUATION_COLUMNS} FROM valuations
             WHERE conversation_id = ?1 AND snapshot_hash = ?2"
        );
        conn.query_row(&sql, params![conversation_id, snapshot_hash], parse_valuation_row)
            .optional()
            .map_err(DbError::from)
    }

    /// IDs of valuations waiting for the worker, oldest first
    pub fn pending_valuation_ids(&self, limit: usize) -> DbResult<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM valuations WHERE status = 'PENDING' ORDER BY id ASC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Claim a pending valuation for work.
    ///
    /// Runs under the write lock and re-checks the status, so a valuation that
    /// is already running or terminal is never claimed twice.
    pub fn claim_valuation(&self, id: i64) -> DbResult<Option<Valuation>> {
        self.with_transaction(|tx| {
            let Some(valuation) = query_valuation(tx, id)? else {
                return Err(DbError::ValuationNotFound(id));
            };
            if valuation.status != ValuationStatus::Pending {
                return Ok(None);
            }
            tx.execute(
                "UPDATE valuations SET status = 'RUNNING', updated_at = ?1 WHERE id = ?2",
                params![timestamp(&Utc::now()), id],
            )?;
            query_valuation(tx, id)
        })
    }

    /// Count one compute attempt against a running valuation
    pub fn bump_valuation_attempts(&self, id: i64) -> DbResult<u32> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE valuations SET attempts = attempts + 1, updated_at = ?1 WHERE id = ?2",
            params![timestamp(&Utc::now()), id],
        )?;
        conn.query_row("SELECT attempts FROM valuations WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .map_err(DbError::from)
    }

    /// Return valuations left `RUNNING` by a crashed worker to the queue
    pub fn requeue_running_valuations(&self) -> DbResult<usize> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE valuations SET status = 'PENDING', updated_at = ?1 WHERE status = 'RUNNING'",
            params![timestamp(&Utc::now())],
        )?;
        Ok(updated)
    }

    /// Hand one claimed valuation back to the queue
    pub fn release_valuation(&self, id: i64) -> DbResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE valuations SET status = 'PENDING', updated_at = ?1
             WHERE id = ?2 AND status = 'RUNNING'",
            params![timestamp(&Utc::now()), id],
        )?;
        Ok(updated > 0)
    }

    // ==================== Lead Operations ====================

    /// Most recent lead for a conversation
    pub fn latest_lead(&self, conversation_id: &str) -> DbResult<Option<Lead>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE conversation_id = ?1 ORDER BY id DESC LIMIT 1"
        );
        conn.query_row(&sql, params![conversation_id], parse_lead_row)
            .optional()
            .map_err(DbError::from)
    }

    /// Ids of every conversation, oldest first
    pub fn conversation_ids(&self) -> DbResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id FROM conversations ORDER BY created_at ASC, id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    #[cfg(test)]
    pub fn list_leads(&self, conversation_id: &str) -> DbResult<Vec<Lead>> {
        let conn = self.lock()?;
        let sql =
            format!("SELECT {LEAD_COLUMNS} FROM leads WHERE conversation_id = ?1 ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![conversation_id], parse_lead_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

// ============================================================
// Connection-level helpers
//
// These take a `&Connection` so the projector can call them on the
// transaction that appended the event.
// ============================================================

const CONVERSATION_COLUMNS: &str = "id, tenant_id, session_token_hash, state, last_event_id, \
    last_activity_at, created_at, appraisal_answers, appraisal_current_key, appraisal_snapshot, \
    appraisal_missing, lead_answers, lead_current_key, lead_reuse_candidate";

const VALUATION_COLUMNS: &str = "id, conversation_id, tenant_id, event_id, status, snapshot_hash, \
    input_snapshot, result, error, attempts, created_at, updated_at";

const LEAD_COLUMNS: &str = "id, conversation_id, tenant_id, event_id, name, email, phone, reused, \
    source_lead_id, status, created_at";

pub(crate) fn query_conversation(conn: &Connection, id: &str) -> DbResult<Conversation> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    conn.query_row(&sql, params![id], parse_conversation_row)
        .optional()?
        .ok_or_else(|| DbError::ConversationNotFound(id.to_string()))
}

/// Write the projected state and working memory of a conversation.
///
/// Only applies when `event_id` is not older than what the row already
/// reflects; returns whether the row changed.
pub(crate) fn write_conversation_projection(
    conn: &Connection,
    id: &str,
    state: ConvState,
    working: &WorkingMemory,
    event_id: i64,
    at: &DateTime<Utc>,
) -> DbResult<bool> {
    let snapshot = working
        .appraisal_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let candidate = working
        .lead_reuse_candidate
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let updated = conn.execute(
        "UPDATE conversations SET
            state = ?1,
            appraisal_answers = ?2,
            appraisal_current_key = ?3,
            appraisal_snapshot = ?4,
            appraisal_missing = ?5,
            lead_answers = ?6,
            lead_current_key = ?7,
            lead_reuse_candidate = ?8,
            last_event_id = ?9,
            last_activity_at = ?10
         WHERE id = ?11 AND last_event_id <= ?9",
        params![
            state.as_str(),
            serde_json::to_string(&working.appraisal_answers)?,
            working.appraisal_current_key,
            snapshot,
            serde_json::to_string(&working.appraisal_missing)?,
            serde_json::to_string(&working.lead_answers)?,
            working.lead_current_key,
            candidate,
            event_id,
            timestamp(at),
            id,
        ],
    )?;
    Ok(updated > 0)
}

/// Put a conversation back to its initial projection before a rebuild
pub(crate) fn reset_conversation_projection(conn: &Connection, id: &str) -> DbResult<()> {
    let updated = conn.execute(
        "UPDATE conversations SET
            state = 'CHAT', last_event_id = 0,
            appraisal_answers = '{}', appraisal_current_key = NULL, appraisal_snapshot = NULL,
            appraisal_missing = '[]', lead_answers = '{}', lead_current_key = NULL,
            lead_reuse_candidate = NULL
         WHERE id = ?1",
        params![id],
    )?;
    if updated == 0 {
        return Err(DbError::ConversationNotFound(id.to_string()));
    }
    Ok(())
}

/// Insert a transcript message; a second insert for the same event is ignored
pub(crate) fn insert_message(
    conn: &Connection,
    ctx: &ConversationContext,
    event_id: i64,
    role: Role,
    text: &str,
    at: &DateTime<Utc>,
) -> DbResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO messages (conversation_id, tenant_id, event_id, role, text, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(conversation_id, event_id) DO NOTHING",
        params![
            ctx.conversation_id,
            ctx.tenant_id,
            event_id,
            role.to_string(),
            text,
            timestamp(at),
        ],
    )?;
    Ok(inserted > 0)
}

/// Insert a pending valuation for a snapshot.
///
/// A later request for a snapshot whose valuation failed puts that row back
/// in the queue under the new request event. Any other repeat, including a
/// replay of an older request, is a no-op.
pub(crate) fn insert_valuation(
    conn: &Connection,
    ctx: &ConversationContext,
    event_id: i64,
    snapshot: &AnswerMap,
    snapshot_hash: &str,
    at: &DateTime<Utc>,
) -> DbResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO valuations (conversation_id, tenant_id, event_id, status, snapshot_hash,
            input_snapshot, attempts, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'PENDING', ?4, ?5, 0, ?6, ?6)
         ON CONFLICT(conversation_id, snapshot_hash) DO UPDATE SET
            status = 'PENDING', event_id = excluded.event_id, result = NULL, error = NULL,
            attempts = 0, updated_at = excluded.updated_at
         WHERE valuations.status = 'FAILED' AND valuations.event_id < excluded.event_id",
        params![
            ctx.conversation_id,
            ctx.tenant_id,
            event_id,
            snapshot_hash,
            serde_json::to_string(snapshot)?,
            timestamp(at),
        ],
    )?;
    Ok(inserted > 0)
}

/// Move a non-terminal valuation to `COMPLETED`
pub(crate) fn complete_valuation(
    conn: &Connection,
    conversation_id: &str,
    valuation_id: i64,
    result: &Value,
    at: &DateTime<Utc>,
) -> DbResult<bool> {
    let updated = conn.execute(
        "UPDATE valuations SET status = 'COMPLETED', result = ?1, error = NULL, updated_at = ?2
         WHERE id = ?3 AND conversation_id = ?4 AND status NOT IN ('COMPLETED', 'FAILED')",
        params![
            serde_json::to_string(result)?,
            timestamp(at),
            valuation_id,
            conversation_id
        ],
    )?;
    Ok(updated > 0)
}

/// Move a non-terminal valuation to `FAILED`
pub(crate) fn fail_valuation(
    conn: &Connection,
    conversation_id: &str,
    valuation_id: i64,
    error: &str,
    attempts: u32,
    at: &DateTime<Utc>,
) -> DbResult<bool> {
    let updated = conn.execute(
        "UPDATE valuations
         SET status = 'FAILED', error = ?1, attempts = MAX(attempts, ?2), updated_at = ?3
         WHERE id = ?4 AND conversation_id = ?5 AND status NOT IN ('COMPLETED', 'FAILED')",
        params![error, attempts, timestamp(at), valuation_id, conversation_id],
    )?;
    Ok(updated > 0)
}

/// Contact fields of a lead about to be inserted
pub(crate) struct NewLead<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
    pub reused: bool,
    pub source_lead_id: Option<i64>,
}

/// Insert a lead; one per originating event
pub(crate) fn insert_lead(
    conn: &Connection,
    ctx: &ConversationContext,
    event_id: i64,
    lead: &NewLead<'_>,
    at: &DateTime<Utc>,
) -> DbResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO leads (conversation_id, tenant_id, event_id, name, email, phone, reused,
            source_lead_id, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'NEW', ?9)
         ON CONFLICT(event_id) DO NOTHING",
        params![
            ctx.conversation_id,
            ctx.tenant_id,
            event_id,
            lead.name,
            lead.email,
            lead.phone,
            lead.reused,
            lead.source_lead_id,
            timestamp(at),
        ],
    )?;
    Ok(inserted > 0)
}

pub(crate) fn query_valuation(conn: &Connection, id: i64) -> DbResult<Option<Valuation>> {
    let sql = format!("SELECT {VALUATION_COLUMNS} FROM valuations WHERE id = ?1");
    conn.query_row(&sql, params![id], parse_valuation_row)
        .optional()
        .map_err(DbError::from)
}

// ============================================================
// Row parsing
// ============================================================

fn parse_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let working = WorkingMemory {
        appraisal_answers: parse_json_or_default(&row.get::<_, String>(7)?),
        appraisal_current_key: row.get(8)?,
        appraisal_snapshot: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        appraisal_missing: parse_json_or_default(&row.get::<_, String>(10)?),
        lead_answers: parse_json_or_default(&row.get::<_, String>(11)?),
        lead_current_key: row.get(12)?,
        lead_reuse_candidate: row
            .get::<_, Option<String>>(13)?
            .and_then(|s| serde_json::from_str(&s).ok()),
    };

    Ok(Conversation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        session_token_hash: row.get(2)?,
        state: parse_column(3, &row.get::<_, String>(3)?)?,
        last_event_id: row.get(4)?,
        last_activity_at: parse_datetime(&row.get::<_, String>(5)?),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        working,
    })
}

fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        tenant_id: row.get(2)?,
        event_id: row.get(3)?,
        role: parse_column(4, &row.get::<_, String>(4)?)?,
        text: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_valuation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Valuation> {
    Ok(Valuation {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        tenant_id: row.get(2)?,
        event_id: row.get(3)?,
        status: parse_column(4, &row.get::<_, String>(4)?)?,
        snapshot_hash: row.get(5)?,
        input_snapshot: parse_json_or_default(&row.get::<_, String>(6)?),
        result: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get(8)?,
        attempts: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

fn parse_lead_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        tenant_id: row.get(2)?,
        event_id: row.get(3)?,
        name: row.get(4)?,
        email: row.get(5)?,
        phone: row.get(6)?,
        reused: row.get(7)?,
        source_lead_id: row.get(8)?,
        status: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

pub(crate) fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(s: &str) -> T {
    serde_json::from_str(s).unwrap_or_default()
}

/// Canonical storage and wire form of a timestamp: RFC 3339, UTC, microseconds
pub fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_tenant("acme", "Acme Auctions").unwrap();
        db
    }

    #[test]
    fn test_create_and_get_conversation() {
        let db = seeded();

        let conv = db.create_conversation("conv-1", "acme", "hash-1").unwrap();
        assert_eq!(conv.id, "conv-1");
        assert_eq!(conv.state, ConvState::Chat);
        assert_eq!(conv.last_event_id, 0);
        assert_eq!(conv.working, WorkingMemory::default());

        let fetched = db.get_conversation("conv-1").unwrap();
        assert_eq!(fetched, conv);
    }

    #[test]
    fn test_missing_conversation() {
        let db = seeded();
        assert!(matches!(
            db.get_conversation("nope"),
            Err(DbError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn test_token_lookup_is_tenant_scoped() {
        let db = seeded();
        db.create_tenant("other", "Other").unwrap();
        db.create_conversation("conv-1", "acme", "hash-1").unwrap();

        assert!(db.find_conversation_by_token("acme", "hash-1").unwrap().is_some());
        assert!(db.find_conversation_by_token("other", "hash-1").unwrap().is_none());
        assert!(db.find_conversation_by_token("acme", "hash-2").unwrap().is_none());
    }

    #[test]
    fn test_questions_ordered_by_index() {
        let db = seeded();
        db.upsert_question("acme", &TenantQuestion::required("year", "Year?", 2))
            .unwrap();
        db.upsert_question("acme", &TenantQuestion::required("maker", "Maker?", 1))
            .unwrap();
        let mut inactive = TenantQuestion::required("notes", "Notes?", 0);
        inactive.active = false;
        db.upsert_question("acme", &inactive).unwrap();

        let keys: Vec<_> = db
            .list_questions("acme")
            .unwrap()
            .into_iter()
            .map(|q| q.key)
            .collect();
        assert_eq!(keys, vec!["notes", "maker", "year"]);
    }

    #[test]
    fn test_projection_write_ignores_older_events() {
        let db = seeded();
        db.create_conversation("conv-1", "acme", "hash-1").unwrap();
        let conn = db.lock().unwrap();
        let now = Utc::now();

        let working = WorkingMemory::default();
        assert!(write_conversation_projection(
            &conn,
            "conv-1",
            ConvState::LeadIntake,
            &working,
            10,
            &now
        )
        .unwrap());
        assert!(!write_conversation_projection(&conn, "conv-1", ConvState::Chat, &working, 9, &now)
            .unwrap());

        let conv = query_conversation(&conn, "conv-1").unwrap();
        assert_eq!(conv.state, ConvState::LeadIntake);
        assert_eq!(conv.last_event_id, 10);
    }

    #[test]
    fn test_working_memory_round_trips() {
        let db = seeded();
        db.create_conversation("conv-1", "acme", "hash-1").unwrap();
        let conn = db.lock().unwrap();

        let mut working = WorkingMemory::default();
        working
            .appraisal_answers
            .insert("maker".to_string(), "Omega".to_string());
        working.appraisal_missing = vec!["year".to_string()];
        working.lead_current_key = Some("email".to_string());
        working.lead_reuse_candidate = Some(LeadCandidate {
            lead_id: 3,
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            phone: "5551234567".to_string(),
        });
        write_conversation_projection(
            &conn,
            "conv-1",
            ConvState::LeadIntake,
            &working,
            1,
            &Utc::now(),
        )
        .unwrap();

        assert_eq!(query_conversation(&conn, "conv-1").unwrap().working, working);
    }

    fn raw_request_event(conn: &Connection) -> i64 {
        conn.execute(
            "INSERT INTO events (conversation_id, tenant_id, type, payload, correlation_id,
                created_at)
             VALUES ('conv-1', 'acme', 'valuation.requested', '{}', 'c', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_failed_valuation_requeued_by_later_request() {
        let db = seeded();
        db.create_conversation("conv-1", "acme", "hash-1").unwrap();
        let ctx = ConversationContext::new("acme", "conv-1");
        let snapshot = AnswerMap::from([("maker".to_string(), "Omega".to_string())]);
        let now = Utc::now();

        let conn = db.lock().unwrap();
        let first = raw_request_event(&conn);
        assert!(insert_valuation(&conn, &ctx, first, &snapshot, "h1", &now).unwrap());
        let id: i64 = conn
            .query_row("SELECT id FROM valuations", [], |row| row.get(0))
            .unwrap();

        // Pending rows ignore repeats
        let second = raw_request_event(&conn);
        assert!(!insert_valuation(&conn, &ctx, second, &snapshot, "h1", &now).unwrap());

        assert!(fail_valuation(&conn, "conv-1", id, "503", 3, &now).unwrap());
        // Replaying the original request leaves the failure alone
        assert!(!insert_valuation(&conn, &ctx, first, &snapshot, "h1", &now).unwrap());

        let third = raw_request_event(&conn);
        assert!(insert_valuation(&conn, &ctx, third, &snapshot, "h1", &now).unwrap());
        drop(conn);

        let valuation = db.get_valuation(id).unwrap();
        assert_eq!(valuation.status, ValuationStatus::Pending);
        assert_eq!(valuation.event_id, third);
        assert_eq!(valuation.attempts, 0);
        assert!(valuation.error.is_none());

        let found = db.find_valuation_by_hash("conv-1", "h1").unwrap();
        assert_eq!(found.map(|v| v.id), Some(id));
        assert!(db.find_valuation_by_hash("conv-1", "h2").unwrap().is_none());
    }

    #[test]
    fn test_release_only_returns_running_valuations() {
        let db = seeded();
        db.create_conversation("conv-1", "acme", "hash-1").unwrap();
        let ctx = ConversationContext::new("acme", "conv-1");
        let snapshot = AnswerMap::new();
        let id = {
            let conn = db.lock().unwrap();
            let event = raw_request_event(&conn);
            insert_valuation(&conn, &ctx, event, &snapshot, "h1", &Utc::now()).unwrap();
            conn.last_insert_rowid()
        };

        assert!(!db.release_valuation(id).unwrap());
        assert!(db.claim_valuation(id).unwrap().is_some());
        assert!(db.release_valuation(id).unwrap());
        assert_eq!(db.get_valuation(id).unwrap().status, ValuationStatus::Pending);
        assert_eq!(db.conversation_ids().unwrap(), vec!["conv-1".to_string()]);
    }

    #[test]
    fn test_timestamp_is_stable_through_storage() {
        let now = Utc::now();
        let text = timestamp(&now);
        assert!(text.ends_with('Z'));
        assert_eq!(timestamp(&parse_datetime(&text)), text);
    }
}
