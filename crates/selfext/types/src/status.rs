use serde::{Deserialize, Serialize};

/// One external status check as reported by CI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusContext {
    pub context: String,
    pub state: String,
}

impl StatusContext {
    pub fn new(context: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            state: state.into(),
        }
    }
}
