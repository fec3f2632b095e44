//! Projection effects produced by state transitions

use crate::db::Role;

/// Read-model update the projector performs alongside the state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Insert a transcript message, idempotent on (conversation, event)
    UpsertMessage(Role),

    /// Start a fresh appraisal: drop any earlier answers
    ResetAppraisal,

    /// Remember which appraisal question is outstanding
    SetAppraisalQuestion,

    /// Store one appraisal answer
    RecordAppraisalAnswer,

    /// Store snapshot and missing-required keys for confirmation
    StoreConfirmation,

    /// Keep the confirmed snapshot, drop intake fields
    ConfirmAppraisal,

    /// Abandon the appraisal sub-flow
    ClearAppraisal,

    /// Insert a valuation, idempotent on (conversation, snapshot hash)
    UpsertValuation,

    /// Move the valuation to `COMPLETED` and store its result
    CompleteValuation,

    /// Move the valuation to `FAILED` and store the error
    FailValuation,

    /// Start a fresh lead intake
    ResetLead,

    /// Remember which lead slot is outstanding
    SetLeadQuestion,

    /// Store one validated lead answer
    RecordLeadAnswer,

    /// Remember the prior lead offered for reuse
    StoreReuseCandidate,

    /// Drop the reuse candidate if it was declined
    RecordIdentityDecision,

    /// Insert a lead, idempotent on the originating event
    CreateLead,
}
