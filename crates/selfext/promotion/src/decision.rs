use selfext_types::{LifecycleEventType, PromotionControlState};
use serde::{Deserialize, Serialize};

use crate::gate::PromotionGateResult;

/// Outcome of combining the operator pause with the gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PromotionDecision {
    Promote,
    Paused { reason: String },
    Blocked { reasons: Vec<String> },
}

impl PromotionDecision {
    pub fn is_promote(&self) -> bool {
        matches!(self, Self::Promote)
    }

    /// Ledger event recording this decision.
    pub fn event_type(&self) -> LifecycleEventType {
        match self {
            Self::Promote => LifecycleEventType::Promoted,
            Self::Paused { .. } | Self::Blocked { .. } => LifecycleEventType::PromotionBlocked,
        }
    }

    pub fn reasons(&self) -> Vec<String> {
        match self {
            Self::Promote => vec![],
            Self::Paused { reason } => vec![reason.clone()],
            Self::Blocked { reasons } => reasons.clone(),
        }
    }
}

/// A pause wins over any gate result.
pub fn decide(control: &PromotionControlState, gate: &PromotionGateResult) -> PromotionDecision {
    if control.paused {
        let reason = control
            .reason
            .clone()
            .unwrap_or_else(|| "promotion paused by operator".to_string());
        return PromotionDecision::Paused { reason };
    }
    if gate.ready {
        PromotionDecision::Promote
    } else {
        PromotionDecision::Blocked {
            reasons: gate.block_reasons.clone(),
        }
    }
}
