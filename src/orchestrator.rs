//! Conversation orchestrator
//!
//! Reacts to user messages and control actions by recording the events the
//! policy in [`decide`] plans. Every event carries a deterministic
//! idempotency key derived from its trigger, so re-running a handler for the
//! same trigger never emits twice.

mod decide;
pub mod intent;
pub mod lead;
pub mod prompts;

pub use decide::{DecisionInput, PlannedEvent, Planner};
pub use intent::{Intent, IntentClassifier, KeywordClassifier};
pub use prompts::Prompts;

use crate::db::{Conversation, ConversationContext, DbError, TenantQuestion};
use crate::engine::{EngineError, LeadLookup, QuestionProvider};
use crate::event_log::payload::{self, MessagePayload};
use crate::event_log::{Recorder, StoredEvent};
use crate::state_machine::{ConvState, EventType};
use crate::valuation::snapshot_hash;
use lead::LeadValidator;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Longest user message accepted, in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Result of posting a user message
#[derive(Debug)]
pub struct MessageOutcome {
    pub message: StoredEvent,
    /// False when the message was an idempotent retry
    pub created: bool,
    /// Events recorded in response
    pub replies: Vec<StoredEvent>,
}

pub struct Orchestrator<Q: QuestionProvider, L: LeadLookup> {
    recorder: Recorder,
    questions: Q,
    leads: L,
    planner: Planner,
    valuation_wake: Arc<Notify>,
}

impl<Q: QuestionProvider, L: LeadLookup> Orchestrator<Q, L> {
    pub fn new(
        recorder: Recorder,
        questions: Q,
        leads: L,
        classifier: Box<dyn IntentClassifier>,
        prompts: Arc<Prompts>,
        valuation_wake: Arc<Notify>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            recorder,
            questions,
            leads,
            planner: Planner::new(classifier, LeadValidator::new()?, prompts),
            valuation_wake,
        })
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn prompts(&self) -> &Prompts {
        self.planner.prompts()
    }

    /// Load a conversation, scoped to the context's tenant
    pub fn conversation(&self, ctx: &ConversationContext) -> Result<Conversation, EngineError> {
        let conversation = self.recorder.db().get_conversation(&ctx.conversation_id)?;
        if conversation.tenant_id != ctx.tenant_id {
            return Err(DbError::ConversationNotFound(ctx.conversation_id.clone()).into());
        }
        Ok(conversation)
    }

    /// Post the opening assistant message of a new conversation
    pub fn greet(&self, ctx: &ConversationContext) -> Result<StoredEvent, EngineError> {
        let planned = self.planner.greeting();
        let key = format!("conversation:{}", planned.suffix);
        let recorded =
            self.recorder
                .record(ctx, planned.event_type, planned.payload, Some(&key), None)?;
        Ok(recorded.event)
    }

    /// Record a user message and, if it is new, respond to it.
    ///
    /// A repeated `idempotency_key` returns the original message and runs
    /// nothing else.
    pub async fn receive_message(
        &self,
        ctx: &ConversationContext,
        text: &str,
        idempotency_key: Option<&str>,
    ) -> Result<MessageOutcome, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::invalid("text", "message must not be empty"));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(EngineError::invalid(
                "text",
                format!("message must be at most {MAX_MESSAGE_CHARS} characters"),
            ));
        }

        let key = idempotency_key.map(|k| format!("message:{k}"));
        let recorded = self.recorder.record(
            ctx,
            EventType::UserMessageCreated,
            payload::to_value(&MessagePayload {
                text: text.to_string(),
            }),
            key.as_deref(),
            None,
        )?;

        let replies = if recorded.created {
            self.handle_user_message(ctx, &recorded.event).await?
        } else {
            tracing::info!(
                conv_id = %ctx.conversation_id,
                event_id = recorded.event.id(),
                "Duplicate message; skipping orchestration"
            );
            Vec::new()
        };

        Ok(MessageOutcome {
            message: recorded.event,
            created: recorded.created,
            replies,
        })
    }

    /// Decide and record the response to a newly created user message
    pub async fn handle_user_message(
        &self,
        ctx: &ConversationContext,
        trigger: &StoredEvent,
    ) -> Result<Vec<StoredEvent>, EngineError> {
        if trigger.event_type() != EventType::UserMessageCreated {
            return Ok(Vec::new());
        }
        let message: MessagePayload = trigger
            .decode()
            .map_err(|e| EngineError::invalid("payload", e.to_string()))?;

        let conversation = self.conversation(ctx)?;
        let questions = self.questions(ctx).await?;
        let prior_lead = if conversation.state == ConvState::ValuationReady {
            self.leads
                .latest_lead(ctx)
                .await
                .map_err(EngineError::Collaborator)?
        } else {
            None
        };

        let planned = self.planner.decide(&DecisionInput {
            state: conversation.state,
            working: &conversation.working,
            text: &message.text,
            questions: &questions,
            prior_lead: prior_lead.as_ref(),
        });

        tracing::info!(
            conv_id = %ctx.conversation_id,
            trigger_id = trigger.id(),
            state = %conversation.state,
            planned = planned.len(),
            "Handling user message"
        );

        let correlation_id = trigger.correlation_id().to_string();
        planned
            .into_iter()
            .map(|p| {
                let key = format!("{}:{}", trigger.id(), p.suffix);
                self.recorder
                    .record(ctx, p.event_type, p.payload, Some(&key), Some(&correlation_id))
                    .map(|r| r.event)
                    .map_err(EngineError::from)
            })
            .collect()
    }

    /// Confirm the appraisal snapshot and queue its valuation
    pub async fn confirm_appraisal(
        &self,
        ctx: &ConversationContext,
        idempotency_key: Option<&str>,
    ) -> Result<Conversation, EngineError> {
        let conversation = self
            .run_control(ctx, "appraisal.confirm", idempotency_key, |conv, questions| {
                let hash = snapshot_hash(&decide::confirmation_snapshot(&conv.working));
                let existing = self
                    .recorder
                    .db()
                    .find_valuation_by_hash(&ctx.conversation_id, &hash)?;
                self.planner.confirm(conv, questions, existing.as_ref())
            })
            .await?;
        self.valuation_wake.notify_one();
        Ok(conversation)
    }

    /// Abandon the appraisal in progress
    pub async fn cancel_appraisal(
        &self,
        ctx: &ConversationContext,
        idempotency_key: Option<&str>,
    ) -> Result<Conversation, EngineError> {
        self.run_control(ctx, "appraisal.cancel", idempotency_key, |conv, _| {
            self.planner.cancel(conv)
        })
        .await
    }

    /// Answer the offer to reuse prior contact details
    pub async fn decide_lead_identity(
        &self,
        ctx: &ConversationContext,
        reuse: bool,
        idempotency_key: Option<&str>,
    ) -> Result<Conversation, EngineError> {
        self.run_control(ctx, "lead.identity", idempotency_key, |conv, _| {
            self.planner.identity_decision(conv, reuse)
        })
        .await
    }

    async fn questions(
        &self,
        ctx: &ConversationContext,
    ) -> Result<Vec<TenantQuestion>, EngineError> {
        self.questions
            .questions(&ctx.tenant_id)
            .await
            .map_err(EngineError::Collaborator)
    }

    /// Run a control action once per key.
    ///
    /// The first planned event is stored under the bare control key, the
    /// rest under `{key}:{suffix}`. If the bare key is already logged the
    /// action has happened and the current conversation is returned without
    /// a state check.
    async fn run_control(
        &self,
        ctx: &ConversationContext,
        action: &str,
        idempotency_key: Option<&str>,
        plan: impl FnOnce(
            &Conversation,
            &[TenantQuestion],
        ) -> Result<Vec<PlannedEvent>, EngineError>,
    ) -> Result<Conversation, EngineError> {
        let conversation = self.conversation(ctx)?;
        let base = match idempotency_key {
            Some(key) => format!("{key}:{action}"),
            None => format!("{}:{action}", conversation.last_event_id),
        };

        let db = self.recorder.db();
        if db.find_event_by_key(&ctx.conversation_id, &base)?.is_some() {
            tracing::info!(conv_id = %ctx.conversation_id, key = %base, "Control already applied");
            return Ok(conversation);
        }

        let questions = self.questions(ctx).await?;
        let planned = plan(&conversation, &questions)?;

        let correlation_id = Uuid::new_v4().to_string();
        for (i, p) in planned.into_iter().enumerate() {
            let key = if i == 0 {
                base.clone()
            } else {
                format!("{base}:{}", p.suffix)
            };
            self.recorder
                .record(ctx, p.event_type, p.payload, Some(&key), Some(&correlation_id))?;
        }

        let updated = self.conversation(ctx)?;
        tracing::info!(
            conv_id = %ctx.conversation_id,
            action,
            from = %conversation.state,
            to = %updated.state,
            "Control applied"
        );
        Ok(updated)
    }
}
