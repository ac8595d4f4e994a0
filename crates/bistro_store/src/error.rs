//! Error types for the object store.

use std::fmt;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Machine-readable failure category, modeled on the error names of browser
/// object stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A named database, object store or index does not exist.
    NotFound,
    /// A uniqueness constraint was violated, or a store/index already exists.
    ConstraintError,
    /// A value or key was not acceptable (missing key, non-object value).
    DataError,
    /// The operation is not valid in the current state.
    InvalidState,
    /// A write was attempted in a read-only transaction.
    ReadOnly,
    /// The transaction was aborted.
    Aborted,
    /// The transaction has already finished.
    TransactionInactive,
    /// The requested version is not acceptable.
    VersionError,
    /// The durable journal could not be read or written.
    Journal,
    /// The engine has shut down.
    Closed,
}

impl ErrorCode {
    /// Returns the code's name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NotFoundError",
            ErrorCode::ConstraintError => "ConstraintError",
            ErrorCode::DataError => "DataError",
            ErrorCode::InvalidState => "InvalidStateError",
            ErrorCode::ReadOnly => "ReadOnlyError",
            ErrorCode::Aborted => "AbortError",
            ErrorCode::TransactionInactive => "TransactionInactiveError",
            ErrorCode::VersionError => "VersionError",
            ErrorCode::Journal => "JournalError",
            ErrorCode::Closed => "ClosedError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by the store engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    /// Failure category.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl StoreError {
    /// Creates an error with the given code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConstraintError, message)
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DataError, message)
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    /// Creates a read-only error.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReadOnly, message)
    }

    /// Creates an abort error.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Aborted, message)
    }

    /// Creates a transaction-inactive error.
    pub fn inactive(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransactionInactive, message)
    }

    /// Creates an engine-closed error.
    pub fn closed() -> Self {
        Self::new(ErrorCode::Closed, "store engine has shut down")
    }
}

impl From<bistro_storage::StorageError> for StoreError {
    fn from(err: bistro_storage::StorageError) -> Self {
        StoreError::new(ErrorCode::Journal, err.to_string())
    }
}

/// Errors raised while declaring or migrating a schema.
///
/// Any of these makes the database open fail as a whole.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A migration tried to create a store or index that already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// "object store" or "index".
        kind: &'static str,
        /// Name of the existing object.
        name: String,
    },

    /// A migration step failed.
    #[error("migration to version {version} ({name}) failed: {source}")]
    StepFailed {
        /// Version the step introduces.
        version: u32,
        /// Step name.
        name: String,
        /// Underlying failure.
        #[source]
        source: StoreError,
    },

    /// The opened database lacks a store the code requires.
    #[error("required object store '{0}' is missing")]
    MissingStore(String),

    /// The opened database lacks an index the code requires.
    #[error("required index '{index}' on '{store}' is missing")]
    MissingIndex {
        /// Store name.
        store: String,
        /// Index name.
        index: String,
    },

    /// Two steps were registered for the same version.
    #[error("migration version {0} already registered")]
    DuplicateVersion(u32),

    /// Registered steps skip a version.
    #[error("migration version gap: expected {expected}, got {actual}")]
    VersionGap {
        /// Expected version.
        expected: u32,
        /// Version found.
        actual: u32,
    },

    /// The engine failed while opening.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = StoreError::constraint("key 3 already exists");
        assert_eq!(err.to_string(), "ConstraintError: key 3 already exists");
        assert_eq!(err.code, ErrorCode::ConstraintError);
    }

    #[test]
    fn storage_errors_map_to_journal_code() {
        let err: StoreError = bistro_storage::StorageError::FrameTooLarge(9).into();
        assert_eq!(err.code, ErrorCode::Journal);
    }

    #[test]
    fn schema_error_wraps_store_error() {
        let err: SchemaError = StoreError::closed().into();
        assert!(matches!(err, SchemaError::Store(StoreError { code: ErrorCode::Closed, .. })));
    }
}
