//! # Error Types
//!
//! Domain-specific error types for sip-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  sip-core errors (this file)                                            │
//! │  ├── CoreError        - General domain errors                           │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  sip-db errors (separate crate)                                         │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  sip-sync errors (separate crate)                                       │
//! │  └── SyncError        - What the application sees                       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → Application            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An availability string could not be parsed.
    #[error("Unknown availability state: {0}")]
    UnknownAvailabilityState(String),

    /// A payload field holds a different type than the caller expected.
    ///
    /// ## When This Occurs
    /// - A peer running an older build wrote `date` as text
    /// - A record of another record type was applied to this replica
    #[error("Field '{key}' is {actual}, expected {expected}")]
    UnexpectedFieldType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any remote round trip so bad input never leaves the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Collection or blob is larger than allowed.
    #[error("{field} exceeds the limit of {max}")]
    TooLarge { field: String, max: usize },

    /// Invalid format (e.g., control characters, bad record type name).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
