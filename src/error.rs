//! Commissioner error taxonomy and its C-style return codes

use thiserror::Error;

/// Errors reported synchronously by commissioner operations.
///
/// Petition outcomes (pending, rejected, no network) are not errors; they
/// arrive as [`crate::meshcop::CommissioningState`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommissionError {
    #[error("interface {0} is already registered")]
    AlreadyRegistered(i8),

    #[error("interface {0} is not registered")]
    NotRegistered(i8),

    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("joiner {0} not found")]
    NotFound(String),

    /// Unsecure commissioning needs a discovered network before petitioning.
    #[error("no network selected, scan required")]
    ScanRequired,

    #[error("operation not allowed in petition state {0}")]
    InvalidState(String),

    /// The pending petition was discarded before the leader answered.
    #[error("petition cancelled")]
    Cancelled,

    #[error("link failure: {0}")]
    Link(String),
}

impl CommissionError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CommissionError::InvalidParameter {
            reason: reason.into(),
        }
    }

    /// Numeric status for callers speaking the integer return convention.
    ///
    /// `0` is success and never produced here; `-1` is reserved for
    /// [`CommissionError::ScanRequired`].
    pub fn code(&self) -> i32 {
        match self {
            CommissionError::ScanRequired => -1,
            CommissionError::AlreadyRegistered(_) => -2,
            CommissionError::NotRegistered(_) => -3,
            CommissionError::InvalidParameter { .. } => -4,
            CommissionError::NotFound(_) => -5,
            CommissionError::InvalidState(_) => -6,
            CommissionError::Cancelled => -7,
            CommissionError::Link(_) => -8,
        }
    }
}

/// Collapse an operation result into the integer return convention.
pub fn status_code<T>(result: &Result<T, CommissionError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}
