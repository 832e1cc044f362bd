use thiserror::Error;

/// Errors raised while parsing the shared vocabulary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// The string is not a member of the lifecycle event vocabulary.
    #[error("unknown lifecycle event type: {0}")]
    UnknownEventType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_type_display() {
        let e = TypesError::UnknownEventType("deployed".into());
        assert!(e.to_string().contains("deployed"));
    }
}
