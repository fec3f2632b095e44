//! Mock implementations for testing
//!
//! These mocks let the orchestrator and worker run without real I/O.

use super::traits::*;
use crate::db::{AnswerMap, ConversationContext, Lead, TenantQuestion};
use crate::valuation::{ComputeError, ValuationResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

// ============================================================================
// Mock Question Provider
// ============================================================================

/// Returns the same question list for every tenant
#[derive(Default)]
pub struct MockQuestionProvider {
    questions: Vec<TenantQuestion>,
}

impl MockQuestionProvider {
    pub fn new(questions: Vec<TenantQuestion>) -> Self {
        Self { questions }
    }
}

#[async_trait]
impl QuestionProvider for MockQuestionProvider {
    async fn questions(&self, _tenant_id: &str) -> Result<Vec<TenantQuestion>, String> {
        let mut questions = self.questions.clone();
        questions.sort_by_key(|q| q.order_index);
        Ok(questions)
    }
}

// ============================================================================
// Mock Valuation Compute
// ============================================================================

/// Pricing mock that returns queued results
#[derive(Default)]
pub struct MockValuationCompute {
    responses: Mutex<VecDeque<Result<ValuationResult, ComputeError>>>,
    /// Snapshots passed to `compute`
    pub calls: Mutex<Vec<(String, AnswerMap)>>,
}

#[allow(dead_code)]
impl MockValuationCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_result(&self, result: ValuationResult) {
        self.responses.lock().unwrap().push_back(Ok(result));
    }

    pub fn queue_error(&self, error: ComputeError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ValuationCompute for MockValuationCompute {
    async fn compute(
        &self,
        tenant_id: &str,
        snapshot: &AnswerMap,
    ) -> Result<ValuationResult, ComputeError> {
        self.calls
            .lock()
            .unwrap()
            .push((tenant_id.to_string(), snapshot.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ComputeError::network("No mock response queued")))
    }
}

// ============================================================================
// Mock Lead Lookup
// ============================================================================

/// Always returns the configured lead
#[derive(Default)]
pub struct MockLeadLookup {
    lead: Option<Lead>,
}

#[allow(dead_code)]
impl MockLeadLookup {
    pub fn with_lead(lead: Lead) -> Self {
        Self { lead: Some(lead) }
    }
}

#[async_trait]
impl LeadLookup for MockLeadLookup {
    async fn latest_lead(&self, _ctx: &ConversationContext) -> Result<Option<Lead>, String> {
        Ok(self.lead.clone())
    }
}
