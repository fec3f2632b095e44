//! Trait abstractions for the core's collaborators
//!
//! These traits let the orchestrator and valuation worker run against mock
//! implementations in tests.

use crate::db::{AnswerMap, ConversationContext, Database, Lead, TenantQuestion};
use crate::valuation::{ComputeError, ValuationResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Tenant-configured appraisal questions
#[async_trait]
pub trait QuestionProvider: Send + Sync {
    /// All questions for the tenant, ascending by order index
    async fn questions(&self, tenant_id: &str) -> Result<Vec<TenantQuestion>, String>;
}

/// Prior leads, used to offer identity reuse
#[async_trait]
pub trait LeadLookup: Send + Sync {
    /// Most recent lead recorded for the conversation
    async fn latest_lead(&self, ctx: &ConversationContext) -> Result<Option<Lead>, String>;
}

/// Comparable-pricing service
#[async_trait]
pub trait ValuationCompute: Send + Sync {
    async fn compute(
        &self,
        tenant_id: &str,
        snapshot: &AnswerMap,
    ) -> Result<ValuationResult, ComputeError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: QuestionProvider + ?Sized> QuestionProvider for Arc<T> {
    async fn questions(&self, tenant_id: &str) -> Result<Vec<TenantQuestion>, String> {
        (**self).questions(tenant_id).await
    }
}

#[async_trait]
impl<T: LeadLookup + ?Sized> LeadLookup for Arc<T> {
    async fn latest_lead(&self, ctx: &ConversationContext) -> Result<Option<Lead>, String> {
        (**self).latest_lead(ctx).await
    }
}

#[async_trait]
impl<T: ValuationCompute + ?Sized> ValuationCompute for Arc<T> {
    async fn compute(
        &self,
        tenant_id: &str,
        snapshot: &AnswerMap,
    ) -> Result<ValuationResult, ComputeError> {
        (**self).compute(tenant_id, snapshot).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as the question and lead collaborator
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QuestionProvider for DatabaseStorage {
    async fn questions(&self, tenant_id: &str) -> Result<Vec<TenantQuestion>, String> {
        self.db.list_questions(tenant_id).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl LeadLookup for DatabaseStorage {
    async fn latest_lead(&self, ctx: &ConversationContext) -> Result<Option<Lead>, String> {
        let lead = self
            .db
            .latest_lead(&ctx.conversation_id)
            .map_err(|e| e.to_string())?;
        // Never hand back another tenant's contact details
        Ok(lead.filter(|l| l.tenant_id == ctx.tenant_id))
    }
}
