use thiserror::Error;

/// Protocol-wide error types for the Ballast power ledger.
///
/// Every variant except `InvariantViolation` describes a rejected call that
/// left state untouched and may be retried with corrected input or at a later
/// epoch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BallastError {
    /// Bad amount, duration, or zero-valued change.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller is not the owner or beneficiary, or attempted self-delegation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Epoch not elapsed, already calculated, or lockup not matured.
    #[error("Temporal precondition failed: {0}")]
    Temporal(String),

    /// Accounting invariant broken (e.g. negative power during a fold).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Stake or account not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition (e.g. mutating a superseded stake).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Commodity ledger refused a transfer.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Invalid policy or scenario configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BallastError {
    /// Whether this error signals a defect rather than a rejected request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BallastError::InvariantViolation(_))
    }
}

impl From<serde_json::Error> for BallastError {
    fn from(e: serde_json::Error) -> Self {
        BallastError::Serialization(e.to_string())
    }
}
