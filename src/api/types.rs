//! API request and response types

use crate::db::{Conversation, Lead, Message, Valuation};
use crate::state_machine::ConvState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session credentials and cursor parameters accepted in the query string
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session_token: Option<String>,
    pub tenant: Option<String>,
    /// Kept as text so a malformed cursor is reported, not defaulted
    pub after_id: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub tenant_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub conversation_id: String,
    pub tenant_id: String,
    /// Only ever returned here; the server keeps a hash
    pub session_token: String,
    pub state: ConvState,
    pub greeting: Value,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: Value,
    pub created: bool,
    pub replies: Vec<Value>,
    pub state: ConvState,
}

#[derive(Debug, Deserialize)]
pub struct IdentityRequest {
    pub reuse: bool,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub conversation: Conversation,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub valuations: Vec<Valuation>,
    pub lead: Option<Lead>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<Value>,
    /// Cursor for the next page; the request cursor when nothing was returned
    pub last_event_id: i64,
}
