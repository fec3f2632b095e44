//! Engine wiring
//!
//! Collaborator traits the core consumes, their production adapters, and the
//! error type shared by the orchestrator and the HTTP layer.

pub mod traits;

#[cfg(test)]
pub mod testing;

pub use traits::*;

use crate::db::DbError;
use crate::event_log::RecordError;
use crate::orchestrator::Orchestrator;
use crate::state_machine::ConvState;
use crate::valuation::{HttpValuationCompute, ValuationWorker};
use serde::Serialize;
use thiserror::Error;

/// Orchestrator backed by the database
pub type ProductionOrchestrator = Orchestrator<DatabaseStorage, DatabaseStorage>;

/// Valuation worker calling the HTTP pricing service
pub type ProductionWorker = ValuationWorker<HttpValuationCompute>;

/// One rejected input field
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The action does not fit the conversation's current state
    #[error("Operation not allowed in state {state}")]
    StateConflict { state: ConvState },
    #[error("Validation failed")]
    Validation(Vec<FieldError>),
    #[error("Collaborator failed: {0}")]
    Collaborator(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl EngineError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<RecordError> for EngineError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Validation { field, message } => Self::invalid(field, message),
            RecordError::Db(e) => Self::Db(e),
        }
    }
}
