use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnticipationError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invalid portfolio entry #{index}: {reason}")]
    InvalidEntry { index: usize, reason: String },

    #[error("Empty portfolio: at least one installment is required")]
    EmptyPortfolio,

    #[error("Invalid target ratio {target_percent}%: {reason}")]
    InvalidTarget {
        target_percent: Decimal,
        reason: String,
    },

    #[error("Target ratio {target_percent}% is unreachable (best attainable: {max_attainable_percent}%)")]
    TargetUnreachable {
        target_percent: Decimal,
        max_attainable_percent: Decimal,
    },

    #[error("Collateral ratio undefined in {context}: operation face value is zero")]
    DivideByZeroRatio { context: String },

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Date error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AnticipationError {
    fn from(e: serde_json::Error) -> Self {
        AnticipationError::SerializationError(e.to_string())
    }
}
