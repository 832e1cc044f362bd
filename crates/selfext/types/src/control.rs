//! Promotion control: the operator pause switch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current value of the single promotion-control record.
///
/// `Default` is the implicit first-use state: not paused, nothing recorded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionControlState {
    pub paused: bool,
    /// Always `None` while not paused.
    pub reason: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Requested change to the promotion-control record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionControlUpdate {
    pub paused: bool,
    pub reason: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PromotionControlUpdate {
    pub fn pause(reason: impl Into<String>) -> Self {
        Self {
            paused: true,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn resume() -> Self {
        Self::default()
    }

    pub fn by(mut self, updated_by: impl Into<String>) -> Self {
        self.updated_by = Some(updated_by.into());
        self
    }

    pub fn at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Apply the storage rules: an inactive pause carries no reason, blank
    /// strings become `None`, and a missing timestamp becomes `now`.
    pub fn normalize(self, now: DateTime<Utc>) -> PromotionControlState {
        let reason = if self.paused {
            non_blank(self.reason)
        } else {
            None
        };
        PromotionControlState {
            paused: self.paused,
            reason,
            updated_by: non_blank(self.updated_by),
            updated_at: Some(self.updated_at.unwrap_or(now)),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
