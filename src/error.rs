//! Error types for contactlink.
//!
//! Resolution distinguishes bad input from everything else. Bad input is a
//! [`ValidationError`] and is reported to the caller as-is. Storage failures
//! pass through unchanged inside [`ResolveError::Storage`].

use thiserror::Error;

use crate::storage::StorageError;

/// Input problems detected at the request boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Neither contact point was given.
    #[error("Either email or phoneNumber must be provided")]
    MissingContactPoint,

    /// A field had the wrong JSON type.
    #[error("Field '{field}' must be a {expected}")]
    InvalidFieldType {
        /// Wire name of the field.
        field: &'static str,
        /// What the field should have been.
        expected: &'static str,
    },
}

/// Top-level error type for identity resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Bad input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A store call failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Stored data contradicts the cluster model (for example a link to a
    /// contact that does not exist).
    #[error("Integrity error: {message}")]
    Integrity {
        /// What was inconsistent.
        message: String,
    },
}

impl ResolveError {
    /// Creates an integrity error.
    #[must_use]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if retrying the same request could succeed.
    ///
    /// The resolver itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(StorageError::ConnectionError(_)))
    }
}

/// Result type alias for resolution operations.
pub type ResolveResult<T> = Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactId;

    #[test]
    fn test_missing_contact_point_message() {
        let err = ValidationError::MissingContactPoint;
        assert_eq!(err.to_string(), "Either email or phoneNumber must be provided");
    }

    #[test]
    fn test_invalid_field_type_message() {
        let err = ValidationError::InvalidFieldType {
            field: "phoneNumber",
            expected: "string or number",
        };
        let msg = err.to_string();
        assert!(msg.contains("phoneNumber"));
        assert!(msg.contains("string or number"));
    }

    #[test]
    fn test_resolve_error_from_validation() {
        let err: ResolveError = ValidationError::MissingContactPoint.into();
        assert!(err.is_validation());
        assert!(!err.is_storage());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_resolve_error_from_storage() {
        let err: ResolveError = StorageError::ContactNotFound(ContactId::new(9)).into();
        assert!(err.is_storage());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Contact not found: 9"));
    }

    #[test]
    fn test_connection_errors_are_retryable() {
        let err: ResolveError = StorageError::ConnectionError("refused".to_string()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_integrity_error() {
        let err = ResolveError::integrity("dangling link");
        assert!(!err.is_validation());
        assert!(err.to_string().contains("dangling link"));
    }
}
