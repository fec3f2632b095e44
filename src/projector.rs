//! Projector
//!
//! Turns one stored event into read-model updates: conversation state and
//! working memory, transcript messages, valuations, leads. Runs on the
//! recorder's transaction, so an event and its projections commit together.

use crate::db::{self, Database, DbError, DbResult, NewLead, Role, WorkingMemory};
use crate::event_log::payload::{
    AnswerRecordedPayload, AppraisalConfirmedPayload, ConfirmationRequestedPayload,
    IdentityConfirmationPayload, IdentityDecisionPayload, LeadRequestedPayload, MessagePayload,
    QuestionAskedPayload, ValuationCompletedPayload, ValuationFailedPayload,
    ValuationRequestedPayload,
};
use crate::event_log::StoredEvent;
use crate::state_machine::{transition, ConvState, Effect, Transition};
use rusqlite::Connection;
use serde::de::DeserializeOwned;

/// Apply one event to every read model it touches.
///
/// Safe to call again for the same event: row projections are guarded by
/// their unique constraints and the conversation row ignores events older
/// than the one it already reflects.
pub fn project(conn: &Connection, event: &StoredEvent) -> DbResult<()> {
    let conversation = db::query_conversation(conn, event.conversation_id())?;
    if conversation.tenant_id != event.tenant_id() {
        return Err(DbError::ConversationNotFound(
            event.conversation_id().to_string(),
        ));
    }

    let Transition { next, effect } = transition(conversation.state, event.event_type());
    let mut working = conversation.working;
    apply_working(&mut working, effect, event)?;
    apply_rows(conn, effect, event)?;

    let advanced = db::write_conversation_projection(
        conn,
        event.conversation_id(),
        next,
        &working,
        event.id(),
        &event.created_at(),
    )?;

    if advanced {
        if next != conversation.state {
            tracing::info!(
                conv_id = %event.conversation_id(),
                event_id = event.id(),
                from = %conversation.state,
                to = %next,
                "Conversation state changed"
            );
        }
    } else {
        tracing::debug!(
            conv_id = %event.conversation_id(),
            event_id = event.id(),
            last_event_id = conversation.last_event_id,
            "Older event; conversation row left as is"
        );
    }

    Ok(())
}

/// Re-derive a conversation's projection from its log.
///
/// Resets the conversation row and re-applies every event in id order.
/// Existing message, valuation and lead rows are kept and deduplicate the
/// replayed effects.
pub fn rebuild(db: &Database, conversation_id: &str) -> DbResult<ConvState> {
    db.with_transaction(|tx| {
        db::reset_conversation_projection(tx, conversation_id)?;
        let events = crate::event_log::events_for_conversation(tx, conversation_id)?;
        for event in &events {
            project(tx, event)?;
        }
        let state = db::query_conversation(tx, conversation_id)?.state;
        tracing::info!(
            conv_id = %conversation_id,
            events = events.len(),
            state = %state,
            "Conversation projection rebuilt"
        );
        Ok(state)
    })
}

/// Rebuild every conversation's projection. Returns how many were rebuilt.
pub fn rebuild_all(db: &Database) -> DbResult<usize> {
    let ids = db.conversation_ids()?;
    for id in &ids {
        rebuild(db, id)?;
    }
    Ok(ids.len())
}

fn decode<T: DeserializeOwned>(event: &StoredEvent) -> DbResult<T> {
    event.decode().map_err(|e| DbError::InvalidPayload {
        event_id: event.id(),
        event_type: event.event_type().to_string(),
        reason: e.to_string(),
    })
}

/// Working-memory half of an effect. Pure apart from payload decoding.
fn apply_working(working: &mut WorkingMemory, effect: Effect, event: &StoredEvent) -> DbResult<()> {
    match effect {
        Effect::UpsertMessage(_)
        | Effect::CompleteValuation
        | Effect::FailValuation => {}

        Effect::ResetAppraisal | Effect::ClearAppraisal | Effect::UpsertValuation => {
            working.clear_appraisal();
        }
        Effect::SetAppraisalQuestion => {
            let p: QuestionAskedPayload = decode(event)?;
            working.appraisal_current_key = Some(p.key);
        }
        Effect::RecordAppraisalAnswer => {
            let p: AnswerRecordedPayload = decode(event)?;
            working.appraisal_answers.insert(p.key, p.value);
        }
        Effect::StoreConfirmation => {
            let p: ConfirmationRequestedPayload = decode(event)?;
            working.appraisal_current_key = None;
            working.appraisal_snapshot = Some(p.snapshot);
            working.appraisal_missing = p.missing_required;
        }
        Effect::ConfirmAppraisal => {
            let p: AppraisalConfirmedPayload = decode(event)?;
            working.clear_appraisal();
            working.appraisal_snapshot = Some(p.snapshot);
        }

        Effect::ResetLead | Effect::CreateLead => working.clear_lead(),
        Effect::SetLeadQuestion => {
            let p: QuestionAskedPayload = decode(event)?;
            working.lead_current_key = Some(p.key);
        }
        Effect::RecordLeadAnswer => {
            let p: AnswerRecordedPayload = decode(event)?;
            working.lead_answers.insert(p.key, p.value);
        }
        Effect::StoreReuseCandidate => {
            let p: IdentityConfirmationPayload = decode(event)?;
            working.lead_reuse_candidate = Some(p.candidate);
        }
        Effect::RecordIdentityDecision => {
            let p: IdentityDecisionPayload = decode(event)?;
            if !p.reuse {
                working.lead_reuse_candidate = None;
            }
        }
    }
    Ok(())
}

/// Row half of an effect: messages, valuations, leads
fn apply_rows(conn: &Connection, effect: Effect, event: &StoredEvent) -> DbResult<()> {
    let ctx = db::ConversationContext::new(event.tenant_id(), event.conversation_id());
    let at = event.created_at();

    match effect {
        Effect::UpsertMessage(role) => {
            let p: MessagePayload = decode(event)?;
            let inserted = db::insert_message(conn, &ctx, event.id(), role, &p.text, &at)?;
            if inserted && role == Role::Assistant {
                tracing::debug!(
                    conv_id = %ctx.conversation_id,
                    event_id = event.id(),
                    "Assistant message projected"
                );
            }
        }
        Effect::UpsertValuation => {
            let p: ValuationRequestedPayload = decode(event)?;
            if !db::insert_valuation(conn, &ctx, event.id(), &p.snapshot, &p.snapshot_hash, &at)? {
                tracing::info!(
                    conv_id = %ctx.conversation_id,
                    snapshot_hash = %p.snapshot_hash,
                    "Valuation for this snapshot already exists"
                );
            }
        }
        Effect::CompleteValuation => {
            let p: ValuationCompletedPayload = decode(event)?;
            let result = serde_json::to_value(&p.result)?;
            db::complete_valuation(conn, &ctx.conversation_id, p.valuation_id, &result, &at)?;
        }
        Effect::FailValuation => {
            let p: ValuationFailedPayload = decode(event)?;
            db::fail_valuation(
                conn,
                &ctx.conversation_id,
                p.valuation_id,
                &p.error,
                p.attempts,
                &at,
            )?;
        }
        Effect::CreateLead => {
            let p: LeadRequestedPayload = decode(event)?;
            let lead = NewLead {
                name: &p.name,
                email: &p.email,
                phone: &p.phone,
                reused: p.reused,
                source_lead_id: p.source_lead_id,
            };
            if db::insert_lead(conn, &ctx, event.id(), &lead, &at)? {
                tracing::info!(
                    conv_id = %ctx.conversation_id,
                    event_id = event.id(),
                    reused = p.reused,
                    "Lead created"
                );
            }
        }
        Effect::ResetAppraisal
        | Effect::SetAppraisalQuestion
        | Effect::RecordAppraisalAnswer
        | Effect::StoreConfirmation
        | Effect::ConfirmAppraisal
        | Effect::ClearAppraisal
        | Effect::ResetLead
        | Effect::SetLeadQuestion
        | Effect::RecordLeadAnswer
        | Effect::StoreReuseCandidate
        | Effect::RecordIdentityDecision => {}
    }
    Ok(())
}
