//! HTTP error mapping

use crate::db::DbError;
use crate::engine::{EngineError, FieldError};
use crate::state_machine::ConvState;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    NotFound(String),
    Conflict { state: ConvState },
    Unprocessable(Vec<FieldError>),
    Internal(String),
}

impl AppError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Unprocessable(vec![FieldError::new(field, message)])
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::TenantNotFound(_) | DbError::ConversationNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::StateConflict { state } => AppError::Conflict { state },
            EngineError::Validation(fields) => AppError::Unprocessable(fields),
            EngineError::Collaborator(msg) => AppError::Internal(msg),
            EngineError::Db(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::invalid("body", rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Conflict { state } => (
                StatusCode::CONFLICT,
                json!({ "error": "state_conflict", "state": state }),
            ),
            AppError::Unprocessable(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "validation_failed", "fields": fields }),
            ),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
