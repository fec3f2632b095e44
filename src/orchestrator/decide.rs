//! Pure conversation policy
//!
//! Given the conversation's state, working memory, the message text and the
//! tenant's questions, decide which events to append. No I/O happens here;
//! the orchestrator records whatever comes back.

use super::intent::{Intent, IntentClassifier};
use super::lead::{LeadSlot, LeadValidator};
use super::prompts::Prompts;
use crate::db::{
    AnswerMap, Conversation, Lead, TenantQuestion, Valuation, ValuationStatus, WorkingMemory,
};
use crate::engine::{EngineError, FieldError};
use crate::event_log::payload::{
    self, AnswerRecordedPayload, AppraisalCancelledPayload, AppraisalConfirmedPayload,
    ConfirmationRequestedPayload, IdentityConfirmationPayload, IdentityDecisionPayload,
    LeadRequestedPayload, MessagePayload, QuestionAskedPayload, ValuationCompletedPayload,
    ValuationRequestedPayload,
};
use crate::state_machine::{ConvState, EventType};
use crate::valuation::{snapshot_hash, ValuationResult};
use serde_json::Value;
use std::sync::Arc;

/// An event the policy wants appended
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEvent {
    pub event_type: EventType,
    pub payload: Value,
    /// Appended to the trigger's id to form the idempotency key
    pub suffix: String,
}

/// Everything `decide` looks at
pub struct DecisionInput<'a> {
    pub state: ConvState,
    pub working: &'a WorkingMemory,
    pub text: &'a str,
    /// All tenant questions, any order
    pub questions: &'a [TenantQuestion],
    /// Most recent lead of this conversation, if any
    pub prior_lead: Option<&'a Lead>,
}

#[derive(Default)]
struct Plan(Vec<PlannedEvent>);

impl Plan {
    fn push(&mut self, event_type: EventType, payload: Value, suffix: impl Into<String>) {
        self.0.push(PlannedEvent {
            event_type,
            payload,
            suffix: suffix.into(),
        });
    }

    fn say(&mut self, suffix: impl Into<String>, text: impl Into<String>) {
        self.push(
            EventType::AssistantMessageCreated,
            payload::to_value(&MessagePayload { text: text.into() }),
            format!("assistant.{}", suffix.into()),
        );
    }
}

/// The answers a confirm submits: the snapshot taken when confirmation was
/// requested, else the live answers
pub fn confirmation_snapshot(working: &WorkingMemory) -> AnswerMap {
    working
        .appraisal_snapshot
        .clone()
        .unwrap_or_else(|| working.appraisal_answers.clone())
}

/// Decision policy: intent classifier, lead validation and assistant copy
pub struct Planner {
    classifier: Box<dyn IntentClassifier>,
    validator: LeadValidator,
    prompts: Arc<Prompts>,
}

impl Planner {
    pub fn new(
        classifier: Box<dyn IntentClassifier>,
        validator: LeadValidator,
        prompts: Arc<Prompts>,
    ) -> Self {
        Self {
            classifier,
            validator,
            prompts,
        }
    }

    pub fn prompts(&self) -> &Prompts {
        &self.prompts
    }

    /// Events to append in response to one user message
    pub fn decide(&self, input: &DecisionInput<'_>) -> Vec<PlannedEvent> {
        let mut plan = Plan::default();
        match input.state {
            ConvState::AppraisalConfirm | ConvState::LeadIdentityConfirm => {
                plan.say("use_controls", &self.prompts.use_controls);
            }
            ConvState::AppraisalIntake => self.continue_appraisal(input, &mut plan),
            ConvState::LeadIntake => self.continue_lead(input, &mut plan),
            ConvState::Chat
            | ConvState::ValuationRunning
            | ConvState::ValuationReady
            | ConvState::ValuationFailed => self.route_intent(input, &mut plan),
        }
        plan.0
    }

    fn route_intent(&self, input: &DecisionInput<'_>, plan: &mut Plan) {
        match (self.classifier.classify(input.text), input.state) {
            (Intent::Lead, ConvState::ValuationReady) => match input.prior_lead {
                Some(lead) => {
                    let candidate = lead.to_candidate();
                    let text = self.prompts.identity(&candidate);
                    plan.push(
                        EventType::LeadIdentityConfirmationRequested,
                        payload::to_value(&IdentityConfirmationPayload { candidate }),
                        "lead.identity_confirmation_requested",
                    );
                    plan.say("identity_confirmation", text);
                }
                None => self.start_lead(plan),
            },
            (Intent::Lead, _) => plan.say("lead_unavailable", &self.prompts.lead_unavailable),
            (Intent::Appraisal, ConvState::ValuationRunning) => {
                plan.say("valuation_in_progress", &self.prompts.valuation_in_progress);
            }
            (Intent::Appraisal, _) => {
                plan.push(EventType::AppraisalStarted, payload::empty(), "appraisal.started");
                self.ask_next_or_confirm(input.questions, &AnswerMap::new(), plan);
            }
            (Intent::None, _) => plan.say("fallback", &self.prompts.fallback),
        }
    }

    // ==================== Appraisal ====================

    fn continue_appraisal(&self, input: &DecisionInput<'_>, plan: &mut Plan) {
        let mut answers = input.working.appraisal_answers.clone();
        let current = input
            .working
            .appraisal_current_key
            .as_deref()
            .and_then(|key| input.questions.iter().find(|q| q.key == key));

        if let Some(question) = current {
            let value = input.text.trim();
            if value.is_empty() {
                plan.say(format!("reprompt.{}", question.key), self.prompts.reprompt(question));
                return;
            }
            plan.push(
                EventType::AppraisalAnswerRecorded,
                payload::to_value(&AnswerRecordedPayload {
                    key: question.key.clone(),
                    value: value.to_string(),
                }),
                format!("appraisal.answer.{}", question.key),
            );
            answers.insert(question.key.clone(), value.to_string());
        }

        self.ask_next_or_confirm(input.questions, &answers, plan);
    }

    /// Ask the first unanswered intake question, or request confirmation
    /// once every one has an answer
    fn ask_next_or_confirm(
        &self,
        questions: &[TenantQuestion],
        answers: &AnswerMap,
        plan: &mut Plan,
    ) {
        let intake = intake_questions(questions);

        if let Some(question) = intake.iter().find(|q| !answers.contains_key(&q.key)) {
            plan.push(
                EventType::AppraisalQuestionAsked,
                payload::to_value(&QuestionAskedPayload {
                    key: question.key.clone(),
                    label: Some(question.label.clone()),
                    help_text: question.help_text.clone(),
                    input_type: Some(question.input_type.clone()),
                }),
                format!("appraisal.question.{}", question.key),
            );
            plan.say(format!("question.{}", question.key), self.prompts.question(question));
            return;
        }

        plan.push(
            EventType::AppraisalConfirmationRequested,
            payload::to_value(&ConfirmationRequestedPayload {
                snapshot: answers.clone(),
                missing_required: missing_required(questions, answers),
            }),
            "appraisal.confirmation_requested",
        );
        plan.say("confirmation", self.prompts.confirmation(answers, questions));
    }

    // ==================== Lead ====================

    fn start_lead(&self, plan: &mut Plan) {
        plan.push(EventType::LeadStarted, payload::empty(), "lead.started");
        self.ask_lead(LeadSlot::Name, plan);
    }

    fn ask_lead(&self, slot: LeadSlot, plan: &mut Plan) {
        let text = match slot {
            LeadSlot::Name => &self.prompts.lead_name,
            LeadSlot::Email => &self.prompts.lead_email,
            LeadSlot::Phone => &self.prompts.lead_phone,
        };
        plan.push(
            EventType::LeadQuestionAsked,
            payload::to_value(&QuestionAskedPayload {
                key: slot.as_str().to_string(),
                label: Some(text.clone()),
                help_text: None,
                input_type: None,
            }),
            format!("lead.question.{slot}"),
        );
        plan.say(format!("question.{slot}"), text);
    }

    fn continue_lead(&self, input: &DecisionInput<'_>, plan: &mut Plan) {
        let slot = input
            .working
            .lead_current_key
            .as_deref()
            .and_then(|key| key.parse().ok())
            .unwrap_or(LeadSlot::Name);

        let Some(value) = self.validator.normalize(slot, input.text) else {
            let text = match slot {
                LeadSlot::Name => &self.prompts.invalid_name,
                LeadSlot::Email => &self.prompts.invalid_email,
                LeadSlot::Phone => &self.prompts.invalid_phone,
            };
            plan.say(format!("invalid.{slot}"), text);
            return;
        };

        plan.push(
            EventType::LeadAnswerRecorded,
            payload::to_value(&AnswerRecordedPayload {
                key: slot.as_str().to_string(),
                value: value.clone(),
            }),
            format!("lead.answer.{slot}"),
        );

        if let Some(next) = slot.next() {
            self.ask_lead(next, plan);
            return;
        }

        let mut answers = input.working.lead_answers.clone();
        answers.insert(slot.as_str().to_string(), value);
        let field = |slot: LeadSlot| answers.get(slot.as_str()).cloned().unwrap_or_default();
        self.submit_lead(
            LeadRequestedPayload {
                name: field(LeadSlot::Name),
                email: field(LeadSlot::Email),
                phone: field(LeadSlot::Phone),
                reused: false,
                source_lead_id: None,
            },
            plan,
        );
    }

    fn submit_lead(&self, lead: LeadRequestedPayload, plan: &mut Plan) {
        plan.push(EventType::LeadRequested, payload::to_value(&lead), "lead.requested");
        plan.say("lead_submitted", &self.prompts.lead_submitted);
    }

    // ==================== Controls ====================

    /// Events for the confirm control.
    ///
    /// `existing` is the valuation already stored for this snapshot's hash.
    /// A completed one is answered from its stored result; anything else is
    /// left to the worker.
    pub fn confirm(
        &self,
        conversation: &Conversation,
        questions: &[TenantQuestion],
        existing: Option<&Valuation>,
    ) -> Result<Vec<PlannedEvent>, EngineError> {
        require_state(conversation, &[ConvState::AppraisalConfirm])?;

        let working = &conversation.working;
        let snapshot = confirmation_snapshot(working);
        let mut missing = working.appraisal_missing.clone();
        for key in missing_required(questions, &snapshot) {
            if !missing.contains(&key) {
                missing.push(key);
            }
        }
        if !missing.is_empty() {
            return Err(EngineError::Validation(
                missing
                    .into_iter()
                    .map(|key| FieldError::new(key, "required answer missing"))
                    .collect(),
            ));
        }

        let mut plan = Plan::default();
        plan.push(
            EventType::AppraisalConfirmed,
            payload::to_value(&AppraisalConfirmedPayload {
                snapshot: snapshot.clone(),
            }),
            "appraisal.confirmed",
        );
        let hash = snapshot_hash(&snapshot);
        plan.push(
            EventType::ValuationRequested,
            payload::to_value(&ValuationRequestedPayload {
                snapshot,
                snapshot_hash: hash.clone(),
            }),
            "valuation.requested",
        );

        match existing {
            Some(valuation) if valuation.status == ValuationStatus::Completed => {
                let result: ValuationResult = valuation
                    .result
                    .clone()
                    .map(serde_json::from_value::<ValuationResult>)
                    .transpose()
                    .map_err(|e| EngineError::Collaborator(e.to_string()))?
                    .ok_or_else(|| {
                        EngineError::Collaborator(format!(
                            "valuation {} completed without a result",
                            valuation.id
                        ))
                    })?;
                let summary = self.prompts.valuation_summary(&result);
                plan.push(
                    EventType::ValuationCompleted,
                    payload::to_value(&ValuationCompletedPayload {
                        valuation_id: valuation.id,
                        snapshot_hash: hash,
                        result,
                    }),
                    "valuation.completed",
                );
                plan.say("valuation_ready", summary);
            }
            _ => plan.say("appraisal_confirmed", &self.prompts.appraisal_confirmed),
        }
        Ok(plan.0)
    }

    /// Events for the cancel control
    pub fn cancel(&self, conversation: &Conversation) -> Result<Vec<PlannedEvent>, EngineError> {
        require_state(
            conversation,
            &[ConvState::AppraisalIntake, ConvState::AppraisalConfirm],
        )?;

        let mut plan = Plan::default();
        plan.push(
            EventType::AppraisalCancelled,
            payload::to_value(&AppraisalCancelledPayload {
                reason: Some("user_cancelled".to_string()),
            }),
            "appraisal.cancelled",
        );
        plan.say("appraisal_cancelled", &self.prompts.appraisal_cancelled);
        Ok(plan.0)
    }

    /// Events for the yes/no identity reuse control
    pub fn identity_decision(
        &self,
        conversation: &Conversation,
        reuse: bool,
    ) -> Result<Vec<PlannedEvent>, EngineError> {
        require_state(conversation, &[ConvState::LeadIdentityConfirm])?;

        let mut plan = Plan::default();
        plan.push(
            EventType::LeadIdentityDecisionRecorded,
            payload::to_value(&IdentityDecisionPayload { reuse }),
            "lead.identity_decision_recorded",
        );

        match (reuse, &conversation.working.lead_reuse_candidate) {
            (true, Some(candidate)) => self.submit_lead(
                LeadRequestedPayload {
                    name: candidate.name.clone(),
                    email: candidate.email.clone(),
                    phone: candidate.phone.clone(),
                    reused: true,
                    source_lead_id: Some(candidate.lead_id),
                },
                &mut plan,
            ),
            _ => self.start_lead(&mut plan),
        }
        Ok(plan.0)
    }

    /// Assistant greeting for a new conversation
    pub fn greeting(&self) -> PlannedEvent {
        PlannedEvent {
            event_type: EventType::AssistantMessageCreated,
            payload: payload::to_value(&MessagePayload {
                text: self.prompts.greeting.clone(),
            }),
            suffix: "assistant.greeting".to_string(),
        }
    }
}

fn require_state(conversation: &Conversation, allowed: &[ConvState]) -> Result<(), EngineError> {
    if allowed.contains(&conversation.state) {
        Ok(())
    } else {
        Err(EngineError::StateConflict {
            state: conversation.state,
        })
    }
}

/// Required, active questions in ascending order index
fn intake_questions(questions: &[TenantQuestion]) -> Vec<&TenantQuestion> {
    let mut intake: Vec<_> = questions.iter().filter(|q| q.required && q.active).collect();
    intake.sort_by_key(|q| q.order_index);
    intake
}

fn missing_required(questions: &[TenantQuestion], answers: &AnswerMap) -> Vec<String> {
    intake_questions(questions)
        .into_iter()
        .filter(|q| answers.get(&q.key).map_or(true, |v| v.trim().is_empty()))
        .map(|q| q.key.clone())
        .collect()
}
