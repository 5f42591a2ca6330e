use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("SQLite error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Data integrity error: {0}")]
    Integrity(String),
}

impl ElectionError {
    /// Short machine-readable tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ElectionError::Database(_) => "database",
            ElectionError::NotFound(_) => "not_found",
            ElectionError::Validation(_) => "validation",
            ElectionError::Conflict(_) => "conflict",
            ElectionError::Integrity(_) => "integrity",
        }
    }
}

pub type Result<T> = std::result::Result<T, ElectionError>;
