use thiserror::Error;

/// The candidate failed to parse or typecheck.
///
/// Carries all diagnostics; `Display` joins them with newlines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{}", .diagnostics.join("\n"))]
pub struct CompilationError {
    pub diagnostics: Vec<String>,
}

impl CompilationError {
    pub fn new(diagnostics: Vec<String>) -> Self {
        let diagnostics = if diagnostics.is_empty() {
            vec!["compilation failed without diagnostics".to_string()]
        } else {
            diagnostics
        };
        Self { diagnostics }
    }

    pub fn single(diagnostic: impl Into<String>) -> Self {
        Self::new(vec![diagnostic.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_all_diagnostics() {
        let e = CompilationError::new(vec!["line 1: bad".into(), "line 4: worse".into()]);
        assert_eq!(e.to_string(), "line 1: bad\nline 4: worse");
    }

    #[test]
    fn empty_diagnostics_get_placeholder() {
        let e = CompilationError::new(vec![]);
        assert_eq!(e.diagnostics.len(), 1);
        assert!(e.to_string().contains("without diagnostics"));
    }

    #[test]
    fn error_is_std_error() {
        let e: Box<dyn std::error::Error> = Box::new(CompilationError::single("x"));
        assert_eq!(e.to_string(), "x");
    }
}
