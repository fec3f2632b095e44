//! Event types that can occur in a conversation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of event types accepted by the event log.
///
/// Adding a variant without a matching arm in `transition` fails to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventType {
    // Transcript
    UserMessageCreated,
    AssistantMessageCreated,

    // Appraisal intake
    AppraisalStarted,
    AppraisalQuestionAsked,
    AppraisalAnswerRecorded,
    AppraisalConfirmationRequested,
    AppraisalConfirmed,
    AppraisalCancelled,

    // Valuation
    ValuationRequested,
    ValuationCompleted,
    ValuationFailed,

    // Lead capture
    LeadStarted,
    LeadQuestionAsked,
    LeadAnswerRecorded,
    LeadIdentityConfirmationRequested,
    LeadIdentityDecisionRecorded,
    LeadRequested,
}

impl EventType {
    pub const ALL: [EventType; 17] = [
        EventType::UserMessageCreated,
        EventType::AssistantMessageCreated,
        EventType::AppraisalStarted,
        EventType::AppraisalQuestionAsked,
        EventType::AppraisalAnswerRecorded,
        EventType::AppraisalConfirmationRequested,
        EventType::AppraisalConfirmed,
        EventType::AppraisalCancelled,
        EventType::ValuationRequested,
        EventType::ValuationCompleted,
        EventType::ValuationFailed,
        EventType::LeadStarted,
        EventType::LeadQuestionAsked,
        EventType::LeadAnswerRecorded,
        EventType::LeadIdentityConfirmationRequested,
        EventType::LeadIdentityDecisionRecorded,
        EventType::LeadRequested,
    ];

    /// Wire and storage name
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::UserMessageCreated => "message.user.created",
            EventType::AssistantMessageCreated => "message.assistant.created",
            EventType::AppraisalStarted => "appraisal.started",
            EventType::AppraisalQuestionAsked => "appraisal.question_asked",
            EventType::AppraisalAnswerRecorded => "appraisal.answer_recorded",
            EventType::AppraisalConfirmationRequested => "appraisal.confirmation_requested",
            EventType::AppraisalConfirmed => "appraisal.confirmed",
            EventType::AppraisalCancelled => "appraisal.cancelled",
            EventType::ValuationRequested => "valuation.requested",
            EventType::ValuationCompleted => "valuation.completed",
            EventType::ValuationFailed => "valuation.failed",
            EventType::LeadStarted => "lead.started",
            EventType::LeadQuestionAsked => "lead.question_asked",
            EventType::LeadAnswerRecorded => "lead.answer_recorded",
            EventType::LeadIdentityConfirmationRequested => "lead.identity_confirmation_requested",
            EventType::LeadIdentityDecisionRecorded => "lead.identity_decision_recorded",
            EventType::LeadRequested => "lead.requested",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

impl TryFrom<String> for EventType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}
