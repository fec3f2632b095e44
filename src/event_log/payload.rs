//! Typed payloads for each event type
//!
//! Events store their payload as a JSON object. These structs are what the
//! orchestrator and worker serialize and what the projector decodes.

use crate::db::{AnswerMap, LeadCandidate};
use crate::valuation::ValuationResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `message.user.created` / `message.assistant.created`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub text: String,
}

/// `appraisal.question_asked` / `lead.question_asked`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionAskedPayload {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
}

/// `appraisal.answer_recorded` / `lead.answer_recorded`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerRecordedPayload {
    pub key: String,
    pub value: String,
}

/// `appraisal.confirmation_requested`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmationRequestedPayload {
    pub snapshot: AnswerMap,
    #[serde(default)]
    pub missing_required: Vec<String>,
}

/// `appraisal.confirmed`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppraisalConfirmedPayload {
    pub snapshot: AnswerMap,
}

/// `appraisal.cancelled`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppraisalCancelledPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `valuation.requested`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationRequestedPayload {
    pub snapshot: AnswerMap,
    pub snapshot_hash: String,
}

/// `valuation.completed`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationCompletedPayload {
    pub valuation_id: i64,
    pub snapshot_hash: String,
    pub result: ValuationResult,
}

/// `valuation.failed`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationFailedPayload {
    pub valuation_id: i64,
    pub snapshot_hash: String,
    pub error: String,
    pub attempts: u32,
}

/// `lead.identity_confirmation_requested`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfirmationPayload {
    pub candidate: LeadCandidate,
}

/// `lead.identity_decision_recorded`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityDecisionPayload {
    pub reuse: bool,
}

/// `lead.requested`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadRequestedPayload {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub reused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lead_id: Option<i64>,
}

/// Payload for events that carry no data (`appraisal.started`, `lead.started`)
pub fn empty() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Serialize a payload struct. Every struct here serializes to an object.
pub fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
