use thiserror::Error;

/// Indicator-state failures. Both are retryable by waiting for more data,
/// not fatal to the process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("insufficient history: {have}/{need} bars after session filter")]
    InsufficientHistory { have: usize, need: usize },

    #[error("EMA values still undefined after seeding (extend the lookback)")]
    IndeterminateEma,
}

/// Bracket submission failures. A failed leg is surfaced with context and the
/// attempt is abandoned; nothing is cancelled or rolled back automatically.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{leg} order submission failed: {message}")]
    OrderSubmission { leg: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_history_message() {
        let err = EngineError::InsufficientHistory { have: 42, need: 205 };
        assert_eq!(
            err.to_string(),
            "insufficient history: 42/205 bars after session filter"
        );
    }

    #[test]
    fn test_order_submission_message() {
        let err = ExecutionError::OrderSubmission {
            leg: "take-profit",
            message: "gateway error 503".to_string(),
        };
        assert!(err.to_string().contains("take-profit"));
    }
}
