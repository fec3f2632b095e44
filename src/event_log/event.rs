//! Write-once event value

use crate::db::timestamp;
use crate::state_machine::EventType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A persisted event.
///
/// Fields are private and there are no setters; a `StoredEvent` can only be
/// built by the store from a row it just inserted or read.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    id: i64,
    conversation_id: String,
    tenant_id: String,
    event_type: EventType,
    payload: Value,
    correlation_id: String,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
}

/// Wire envelope, shared by debug inspection and the live stream
#[derive(Debug, Serialize)]
pub struct WireEvent<'a> {
    pub id: i64,
    pub conversation_id: &'a str,
    pub tenant_id: &'a str,
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub payload: &'a Value,
    pub correlation_id: &'a str,
    pub idempotency_key: Option<&'a str>,
    pub created_at: String,
}

impl StoredEvent {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn from_parts(
        id: i64,
        conversation_id: String,
        tenant_id: String,
        event_type: EventType,
        payload: Value,
        correlation_id: String,
        idempotency_key: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            tenant_id,
            event_type,
            payload,
            correlation_id,
            idempotency_key,
            created_at,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Decode the payload into its typed form
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn to_wire(&self) -> WireEvent<'_> {
        WireEvent {
            id: self.id,
            conversation_id: &self.conversation_id,
            tenant_id: &self.tenant_id,
            event_type: self.event_type.as_str(),
            payload: &self.payload,
            correlation_id: &self.correlation_id,
            idempotency_key: self.idempotency_key.as_deref(),
            created_at: timestamp(&self.created_at),
        }
    }
}
