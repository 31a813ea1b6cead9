use thiserror::Error;

impl From<serde_json::Error> for IntegrityError {
    fn from(err: serde_json::Error) -> Self {
        Self::CryptoError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for IntegrityError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored hash disagrees with its recomputation, or a link is broken.
    /// Always carries the offending sequence number when one is known.
    #[error("Integrity violation at sequence {sequence_no:?}: {message}")]
    IntegrityViolation {
        sequence_no: Option<u64>,
        message: String,
    },

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

pub type Result<T> = std::result::Result<T, IntegrityError>;

impl IntegrityError {
    pub fn missing_field(field: &str) -> Self {
        Self::ValidationError(format!("Missing required field: {}", field))
    }

    pub fn violation(sequence_no: Option<u64>, message: impl Into<String>) -> Self {
        Self::IntegrityViolation {
            sequence_no,
            message: message.into(),
        }
    }

    /// Whether the caller can recover by correcting input or retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_) | Self::NotFound(_) | Self::ConcurrencyConflict(_)
        )
    }
}
