//! # Economy Error Types
//!
//! All errors that can occur in the economy crate.

use thiserror::Error;

/// Errors that can occur in the economy system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    /// Arithmetic overflow in fixed-point calculation.
    #[error("arithmetic overflow in economic calculation")]
    ArithmeticOverflow,

    /// Invalid configuration file or entry.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Journal could not be opened or written.
    #[error("journal error: {0}")]
    Journal(String),
}

/// Result type for economy operations.
pub type EconomyResult<T> = Result<T, EconomyError>;
