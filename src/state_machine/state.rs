//! Conversation state types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conversation state
///
/// The machine is cyclic: every state can eventually return to `Chat`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvState {
    /// Free chat, no sub-flow active
    #[default]
    Chat,

    /// Asking the tenant's appraisal questions one per turn
    AppraisalIntake,

    /// All required answers collected, waiting for confirm/cancel
    AppraisalConfirm,

    /// Appraisal confirmed, pricing worker has the job
    ValuationRunning,

    /// Valuation result available
    ValuationReady,

    /// Valuation failed after retries
    ValuationFailed,

    /// Offering to reuse contact details from an earlier lead
    LeadIdentityConfirm,

    /// Collecting name, email and phone
    LeadIntake,
}

impl ConvState {
    pub const ALL: [ConvState; 8] = [
        ConvState::Chat,
        ConvState::AppraisalIntake,
        ConvState::AppraisalConfirm,
        ConvState::ValuationRunning,
        ConvState::ValuationReady,
        ConvState::ValuationFailed,
        ConvState::LeadIdentityConfirm,
        ConvState::LeadIntake,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConvState::Chat => "CHAT",
            ConvState::AppraisalIntake => "APPRAISAL_INTAKE",
            ConvState::AppraisalConfirm => "APPRAISAL_CONFIRM",
            ConvState::ValuationRunning => "VALUATION_RUNNING",
            ConvState::ValuationReady => "VALUATION_READY",
            ConvState::ValuationFailed => "VALUATION_FAILED",
            ConvState::LeadIdentityConfirm => "LEAD_IDENTITY_CONFIRM",
            ConvState::LeadIntake => "LEAD_INTAKE",
        }
    }

    /// Intake states consume free text as answers; intent detection is skipped.
    pub fn is_intake(self) -> bool {
        matches!(self, ConvState::AppraisalIntake | ConvState::LeadIntake)
    }

    /// States that only advance through explicit confirm/cancel controls
    pub fn awaits_control(self) -> bool {
        matches!(
            self,
            ConvState::AppraisalConfirm | ConvState::LeadIdentityConfirm
        )
    }
}

impl fmt::Display for ConvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConvState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConvState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown conversation state: {s}"))
    }
}
