//! Idempotent event recorder
//!
//! Appends an event and projects it in one immediate transaction. A caller
//! supplied idempotency key makes retries return the first event instead of
//! writing a second one.

use super::store::{self, NewEvent};
use super::StoredEvent;
use crate::db::{ConversationContext, Database, DbError};
use crate::projector;
use crate::state_machine::EventType;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Db(#[from] DbError),
}

impl RecordError {
    fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Outcome of [`Recorder::record`]
#[derive(Debug, Clone)]
pub struct Recorded {
    pub event: StoredEvent,
    /// False when an earlier event with the same key was returned instead
    pub created: bool,
}

/// The only write path into the event log
#[derive(Clone)]
pub struct Recorder {
    db: Database,
}

impl Recorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Append an event unless `idempotency_key` was already used in this
    /// conversation, then project it.
    ///
    /// An existing key returns the stored event untouched; the new payload is
    /// not looked at. Without a correlation id a fresh v4 UUID is used.
    pub fn record(
        &self,
        ctx: &ConversationContext,
        event_type: EventType,
        payload: Value,
        idempotency_key: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<Recorded, RecordError> {
        let recorded = self.db.with_transaction(|tx| {
            if let Some(key) = idempotency_key {
                if let Some(existing) = store::find_by_key(tx, &ctx.conversation_id, key)? {
                    return Ok(Recorded {
                        event: existing,
                        created: false,
                    });
                }
            }

            if !payload.is_object() {
                return Err(RecordError::validation(
                    "payload",
                    "payload must be a JSON object",
                ));
            }

            let correlation_id = match correlation_id {
                Some(raw) => Uuid::parse_str(raw)
                    .map_err(|_| RecordError::validation("correlation_id", "not a valid UUID"))?
                    .to_string(),
                None => Uuid::new_v4().to_string(),
            };

            let new = NewEvent {
                event_type,
                payload: &payload,
                correlation_id: &correlation_id,
                idempotency_key,
            };

            let event = match store::append(tx, ctx, &new) {
                Ok(event) => event,
                Err(DbError::Sqlite(e)) if is_unique_violation(&e) => {
                    // Another writer got there first; its row wins
                    let winner = idempotency_key
                        .map(|key| store::find_by_key(tx, &ctx.conversation_id, key))
                        .transpose()?
                        .flatten();
                    let Some(winner) = winner else {
                        return Err(DbError::Sqlite(e).into());
                    };
                    tracing::info!(
                        conv_id = %ctx.conversation_id,
                        event_id = winner.id(),
                        "Idempotent insert race recovered"
                    );
                    return Ok(Recorded {
                        event: winner,
                        created: false,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            projector::project(tx, &event)?;

            Ok(Recorded {
                event,
                created: true,
            })
        })?;

        tracing::debug!(
            conv_id = %ctx.conversation_id,
            event_id = recorded.event.id(),
            event_type = %recorded.event.event_type(),
            created = recorded.created,
            "Event recorded"
        );

        Ok(recorded)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
