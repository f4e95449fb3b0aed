//! Domain error types

use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed structured report: {0}")]
    MalformedReport(String),

    #[error("Directive too long: {len} bytes exceeds maximum of {max}")]
    DirectiveTooLong { len: usize, max: usize },

    #[error("Invalid task description: {0}")]
    InvalidTask(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl DomainError {
    /// Check if this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DomainError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_too_long_display() {
        let error = DomainError::DirectiveTooLong {
            len: 100,
            max: 50,
        };
        assert_eq!(
            error.to_string(),
            "Directive too long: 100 bytes exceeds maximum of 50"
        );
    }

    #[test]
    fn test_is_cancelled_check() {
        assert!(DomainError::Cancelled.is_cancelled());
        assert!(!DomainError::MalformedReport("x".to_string()).is_cancelled());
    }
}
