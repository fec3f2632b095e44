//! Database schema and types

pub use crate::state_machine::state::ConvState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// SQL schema for initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tenant_questions (
    tenant_id TEXT NOT NULL,
    key TEXT NOT NULL,
    label TEXT NOT NULL,
    help_text TEXT,
    input_type TEXT NOT NULL DEFAULT 'text',
    required BOOLEAN NOT NULL DEFAULT 1,
    active BOOLEAN NOT NULL DEFAULT 1,
    order_index INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (tenant_id, key),
    FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    session_token_hash TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL DEFAULT 'CHAT',
    last_event_id INTEGER NOT NULL DEFAULT 0,
    last_activity_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    appraisal_answers TEXT NOT NULL DEFAULT '{}',
    appraisal_current_key TEXT,
    appraisal_snapshot TEXT,
    appraisal_missing TEXT NOT NULL DEFAULT '[]',
    lead_answers TEXT NOT NULL DEFAULT '{}',
    lead_current_key TEXT,
    lead_reuse_candidate TEXT,

    FOREIGN KEY (tenant_id) REFERENCES tenants(id)
);

CREATE INDEX IF NOT EXISTS idx_conversations_tenant ON conversations(tenant_id);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    type TEXT NOT NULL,
    payload TEXT NOT NULL CHECK (json_valid(payload) AND json_type(payload) = 'object'),
    correlation_id TEXT NOT NULL,
    idempotency_key TEXT,
    created_at TEXT NOT NULL,

    UNIQUE (conversation_id, idempotency_key),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);

CREATE INDEX IF NOT EXISTS idx_events_stream ON events(tenant_id, conversation_id, id);

CREATE TRIGGER IF NOT EXISTS events_no_update BEFORE UPDATE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS events_no_delete BEFORE DELETE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    event_id INTEGER NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE (conversation_id, event_id),
    FOREIGN KEY (event_id) REFERENCES events(id)
);

CREATE TABLE IF NOT EXISTS valuations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    event_id INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'RUNNING', 'COMPLETED', 'FAILED')),
    snapshot_hash TEXT NOT NULL,
    input_snapshot TEXT NOT NULL,
    result TEXT,
    error TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE (conversation_id, snapshot_hash),
    FOREIGN KEY (event_id) REFERENCES events(id)
);

CREATE INDEX IF NOT EXISTS idx_valuations_status ON valuations(status, id);

CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    event_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL,
    reused BOOLEAN NOT NULL DEFAULT 0,
    source_lead_id INTEGER,
    status TEXT NOT NULL DEFAULT 'NEW',
    created_at TEXT NOT NULL,

    FOREIGN KEY (event_id) REFERENCES events(id)
);

CREATE INDEX IF NOT EXISTS idx_leads_conversation ON leads(conversation_id, id DESC);
"#;

/// Answers keyed by question key. `BTreeMap` keeps them sorted, which the
/// snapshot hash depends on.
pub type AnswerMap = BTreeMap<String, String>;

/// Tenant record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A tenant-configured appraisal question
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantQuestion {
    pub key: String,
    pub label: String,
    pub help_text: Option<String>,
    pub input_type: String,
    pub required: bool,
    pub active: bool,
    pub order_index: i64,
}

impl TenantQuestion {
    #[cfg(test)]
    pub fn required(key: impl Into<String>, label: impl Into<String>, order_index: i64) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            help_text: None,
            input_type: "text".to_string(),
            required: true,
            active: true,
            order_index,
        }
    }
}

/// Tenant and conversation scope threaded through every core call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub tenant_id: String,
    pub conversation_id: String,
}

impl ConversationContext {
    pub fn new(tenant_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

/// Prior contact details offered back to the visitor for reuse
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeadCandidate {
    pub lead_id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Ephemeral fields used only while a sub-flow is in progress
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkingMemory {
    pub appraisal_answers: AnswerMap,
    pub appraisal_current_key: Option<String>,
    pub appraisal_snapshot: Option<AnswerMap>,
    pub appraisal_missing: Vec<String>,
    pub lead_answers: AnswerMap,
    pub lead_current_key: Option<String>,
    pub lead_reuse_candidate: Option<LeadCandidate>,
}

impl WorkingMemory {
    pub fn clear_appraisal(&mut self) {
        self.appraisal_answers.clear();
        self.appraisal_current_key = None;
        self.appraisal_snapshot = None;
        self.appraisal_missing.clear();
    }

    pub fn clear_lead(&mut self) {
        self.lead_answers.clear();
        self.lead_current_key = None;
        self.lead_reuse_candidate = None;
    }
}

/// Conversation record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    #[serde(skip)]
    pub session_token_hash: String,
    pub state: ConvState,
    pub last_event_id: i64,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub working: WorkingMemory,
}

impl Conversation {
    pub fn context(&self) -> ConversationContext {
        ConversationContext::new(&self.tenant_id, &self.id)
    }
}

/// Author of a transcript message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Transcript message, projected from a message event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub tenant_id: String,
    pub event_id: i64,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Valuation lifecycle. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValuationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ValuationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for ValuationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown valuation status: {other}")),
        }
    }
}

/// Valuation record
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Valuation {
    pub id: i64,
    pub conversation_id: String,
    pub tenant_id: String,
    pub event_id: i64,
    pub status: ValuationStatus,
    pub snapshot_hash: String,
    pub input_snapshot: AnswerMap,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lead record, one per `lead.requested` event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Lead {
    pub id: i64,
    pub conversation_id: String,
    pub tenant_id: String,
    pub event_id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub reused: bool,
    pub source_lead_id: Option<i64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn to_candidate(&self) -> LeadCandidate {
        LeadCandidate {
            lead_id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}
