//! HTTP request handlers

use super::auth::{authenticate, generate_token, hash_token};
use super::error::AppError;
use super::types::{
    ControlResponse, ConversationResponse, CreateSessionRequest, EventsResponse,
    IdentityRequest, MessageRequest, MessageResponse, SessionQuery, SessionResponse,
};
use super::AppState;
use crate::event_log::StoredEvent;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/widget/session", post(create_session))
        .route("/api/widget/reset", post(reset_session))
        // Conversation input
        .route("/api/widget/messages", post(post_message))
        .route("/api/widget/appraisal/confirm", post(confirm_appraisal))
        .route("/api/widget/appraisal/cancel", post(cancel_appraisal))
        .route("/api/widget/lead/identity", post(lead_identity))
        // Reads
        .route("/api/widget/conversation", get(get_conversation))
        .route("/api/widget/events", get(list_events))
        .route("/api/widget/stream", get(stream_events))
        .route("/version", get(get_version))
        .with_state(state)
}

fn wire(event: &StoredEvent) -> Value {
    serde_json::to_value(event.to_wire()).unwrap_or(Value::Null)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn parse_cursor(raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|c| *c >= 0)
        .ok_or_else(|| AppError::invalid("after_id", "cursor must be a non-negative integer"))
}

// ============================================================
// Sessions
// ============================================================

async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let Json(request) = payload?;
    let tenant_id = request.tenant_id.trim();
    if tenant_id.is_empty() {
        return Err(AppError::invalid("tenant_id", "tenant_id is required"));
    }
    open_session(&state, tenant_id)
}

/// Start over in a fresh conversation; the old one is left as it was
async fn reset_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let ctx = authenticate(state.db(), &headers, &query)?;
    tracing::info!(conv_id = %ctx.conversation_id, "Session reset");
    open_session(&state, &ctx.tenant_id)
}

fn open_session(
    state: &AppState,
    tenant_id: &str,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let tenant = state.db().get_tenant(tenant_id)?;
    let token = generate_token();
    let conversation = state.db().create_conversation(
        &Uuid::new_v4().to_string(),
        &tenant.id,
        &hash_token(&token),
    )?;
    let greeting = state.orchestrator.greet(&conversation.context())?;

    tracing::info!(
        conv_id = %conversation.id,
        tenant = %tenant.id,
        "Session opened"
    );

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            conversation_id: conversation.id,
            tenant_id: tenant.id,
            session_token: token,
            state: conversation.state,
            greeting: wire(&greeting),
        }),
    ))
}

// ============================================================
// Conversation input
// ============================================================

async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let ctx = authenticate(state.db(), &headers, &query)?;
    let Json(request) = payload?;
    let key = header_value(&headers, IDEMPOTENCY_KEY_HEADER);

    let outcome = state
        .orchestrator
        .receive_message(&ctx, &request.text, key.as_deref())
        .await?;
    let conversation = state.orchestrator.conversation(&ctx)?;

    Ok(Json(MessageResponse {
        message: wire(&outcome.message),
        created: outcome.created,
        replies: outcome.replies.iter().map(wire).collect(),
        state: conversation.state,
    }))
}

async fn confirm_appraisal(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Result<Json<ControlResponse>, AppError> {
    let ctx = authenticate(state.db(), &headers, &query)?;
    let key = header_value(&headers, IDEMPOTENCY_KEY_HEADER);
    let conversation = state
        .orchestrator
        .confirm_appraisal(&ctx, key.as_deref())
        .await?;
    Ok(Json(ControlResponse { conversation }))
}

async fn cancel_appraisal(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Result<Json<ControlResponse>, AppError> {
    let ctx = authenticate(state.db(), &headers, &query)?;
    let key = header_value(&headers, IDEMPOTENCY_KEY_HEADER);
    let conversation = state
        .orchestrator
        .cancel_appraisal(&ctx, key.as_deref())
        .await?;
    Ok(Json(ControlResponse { conversation }))
}

async fn lead_identity(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    payload: Result<Json<IdentityRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, AppError> {
    let ctx = authenticate(state.db(), &headers, &query)?;
    let Json(request) = payload?;
    let key = header_value(&headers, IDEMPOTENCY_KEY_HEADER);
    let conversation = state
        .orchestrator
        .decide_lead_identity(&ctx, request.reuse, key.as_deref())
        .await?;
    Ok(Json(ControlResponse { conversation }))
}

// ============================================================
// Reads
// ============================================================

async fn get_conversation(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Result<Json<ConversationResponse>, AppError> {
    let ctx = authenticate(state.db(), &headers, &query)?;
    let db = state.db();
    let conversation = state.orchestrator.conversation(&ctx)?;
    Ok(Json(ConversationResponse {
        messages: db.list_messages(&ctx.conversation_id)?,
        valuations: db.list_valuations(&ctx.conversation_id)?,
        lead: db.latest_lead(&ctx.conversation_id)?,
        conversation,
    }))
}

/// Raw event envelopes after a cursor, one page at a time
async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Result<Json<EventsResponse>, AppError> {
    let ctx = authenticate(state.db(), &headers, &query)?;
    let after_id = query.after_id.as_deref().map_or(Ok(0), parse_cursor)?;
    let events = state.db().events_after(
        &ctx.tenant_id,
        &ctx.conversation_id,
        after_id,
        state.stream.config().replay_limit,
    )?;
    Ok(Json(EventsResponse {
        last_event_id: events.last().map_or(after_id, StoredEvent::id),
        events: events.iter().map(wire).collect(),
    }))
}

async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let ctx = authenticate(state.db(), &headers, &query)?;
    let cursor = header_value(&headers, LAST_EVENT_ID_HEADER)
        .or_else(|| query.after_id.clone())
        .map_or(Ok(0), |raw| parse_cursor(&raw))?;

    if query.mode.as_deref() == Some("once") {
        let frames = state.stream.single_pass(&ctx, cursor)?;
        let events = frames.into_iter().map(|f| Ok::<_, Infallible>(Event::from(f)));
        return Ok(sse_response(Sse::new(tokio_stream::iter(events))));
    }

    tracing::debug!(conv_id = %ctx.conversation_id, cursor, "Stream opened");
    let (tx, rx) = mpsc::channel(64);
    let gateway = state.stream.clone();
    tokio::spawn(async move {
        let conv_id = ctx.conversation_id.clone();
        if let Err(e) = gateway.run(ctx, cursor, tx).await {
            tracing::warn!(conv_id = %conv_id, error = %e, "Stream ended with error");
        }
    });

    let events = ReceiverStream::new(rx).map(|f| Ok::<_, Infallible>(Event::from(f)));
    Ok(sse_response(Sse::new(events)))
}

/// `Sse` sets `no-cache`; proxies also must not transform or buffer the body
fn sse_response(sse: impl IntoResponse) -> Response {
    (
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
        .into_response()
}

async fn get_version() -> &'static str {
    concat!("appraisal-chat ", env!("CARGO_PKG_VERSION"))
}
