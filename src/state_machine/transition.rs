//! Pure state transition function
//!
//! Maps (current state, event type) to the next state plus the read-model
//! effect the projector applies in the same transaction. Total: every pair
//! has an answer, there is no error path.

use super::{ConvState, Effect, EventType};
use crate::db::Role;

/// Result of a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ConvState,
    pub effect: Effect,
}

impl Transition {
    fn to(next: ConvState, effect: Effect) -> Self {
        Self { next, effect }
    }

    fn stay(state: ConvState, effect: Effect) -> Self {
        Self {
            next: state,
            effect,
        }
    }
}

/// Pure transition function
///
/// Given the same inputs, it always produces the same outputs, with no I/O.
pub fn transition(state: ConvState, event_type: EventType) -> Transition {
    match event_type {
        EventType::UserMessageCreated => Transition::stay(state, Effect::UpsertMessage(Role::User)),
        EventType::AssistantMessageCreated => {
            Transition::stay(state, Effect::UpsertMessage(Role::Assistant))
        }

        EventType::AppraisalStarted => {
            Transition::to(ConvState::AppraisalIntake, Effect::ResetAppraisal)
        }
        EventType::AppraisalQuestionAsked => {
            Transition::to(ConvState::AppraisalIntake, Effect::SetAppraisalQuestion)
        }
        EventType::AppraisalAnswerRecorded => {
            Transition::to(ConvState::AppraisalIntake, Effect::RecordAppraisalAnswer)
        }
        EventType::AppraisalConfirmationRequested => {
            Transition::to(ConvState::AppraisalConfirm, Effect::StoreConfirmation)
        }
        EventType::AppraisalConfirmed => {
            Transition::to(ConvState::ValuationRunning, Effect::ConfirmAppraisal)
        }
        EventType::AppraisalCancelled => Transition::to(ConvState::Chat, Effect::ClearAppraisal),

        EventType::ValuationRequested => {
            Transition::to(ConvState::ValuationRunning, Effect::UpsertValuation)
        }
        EventType::ValuationCompleted => {
            Transition::to(ConvState::ValuationReady, Effect::CompleteValuation)
        }
        EventType::ValuationFailed => {
            Transition::to(ConvState::ValuationFailed, Effect::FailValuation)
        }

        EventType::LeadStarted => Transition::to(ConvState::LeadIntake, Effect::ResetLead),
        EventType::LeadQuestionAsked => {
            Transition::to(ConvState::LeadIntake, Effect::SetLeadQuestion)
        }
        EventType::LeadAnswerRecorded => {
            Transition::to(ConvState::LeadIntake, Effect::RecordLeadAnswer)
        }
        EventType::LeadIdentityConfirmationRequested => {
            Transition::to(ConvState::LeadIdentityConfirm, Effect::StoreReuseCandidate)
        }
        EventType::LeadIdentityDecisionRecorded => {
            Transition::stay(state, Effect::RecordIdentityDecision)
        }
        EventType::LeadRequested => Transition::to(ConvState::Chat, Effect::CreateLead),
    }
}
