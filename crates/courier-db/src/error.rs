use thiserror::Error;

/// Failure taxonomy shared by every core operation.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Malformed input: empty or oversized message, out-of-range score.
    #[error("validation error: {0}")]
    Validation(String),

    /// The write lost against a concurrent one or repeats a completed action.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing, or not visible to the caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence failure. Treated as transient by callers.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, CourierError>;

impl CourierError {
    pub fn storage_msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Storage {
            source: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rusqlite::Error> for CourierError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage {
            source: Box::new(err),
        }
    }
}

/// True when `err` is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
