pub mod error;
pub mod time_value;
pub mod types;

#[cfg(feature = "anticipation")]
pub mod anticipation;

pub use error::AnticipationError;
pub use types::*;

/// Standard result type for all anticipation operations
pub type AnticipationResult<T> = Result<T, AnticipationError>;
