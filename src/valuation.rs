//! Valuation pipeline
//!
//! Confirmed appraisals become `PENDING` valuation rows. A background worker
//! claims them, calls the pricing collaborator and records the outcome as a
//! new event through the recorder.

mod compute;
mod snapshot;
mod worker;

pub use compute::{
    ComputeError, ComputeErrorKind, HttpValuationCompute, PriceRange, ValuationResult,
};
pub use snapshot::snapshot_hash;
pub use worker::{ValuationWorker, WorkerConfig};
