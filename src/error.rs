//! Error types for the Naratama borrowing core

use thiserror::Error;

/// Main application error type
///
/// Domain outcomes are typed variants so the (out-of-scope) HTTP layer can
/// map each one to a distinct status code instead of pattern-matching on
/// message strings.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Out of stock: {0}")]
    OutOfStock(String),

    #[error("Borrow limit exceeded: {current} active of {max} allowed")]
    BorrowLimitExceeded { current: usize, max: usize },

    /// Stock would exceed total on release, double settlement attempted,
    /// or a persisted record carries a code outside the known enums.
    /// Signals a bug upstream, never silently corrected.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Payment gateway charge/refund call failed. Retriable; the borrowing
    /// keeps a pending-settlement marker instead of blocking the request.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Optimistic-lock version mismatch. Caller retries the whole operation.
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::Gateway(_))
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
