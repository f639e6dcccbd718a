use thiserror::Error;

/// Failures of the database core. Each variant maps to exactly one HTTP status
/// in the server crate.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidName(String),
    #[error("Database with this name already exists.")]
    DatabaseExists,
    #[error("Database not found.")]
    DatabaseNotFound,
    #[error("{0}")]
    KeyNotFound(String),
    #[error("Passcode for the database not provided. Provide a passcode as the parameter")]
    MissingPasscode,
    #[error("Invalid passcode for the database.")]
    InvalidPasscode,
    #[error("Expected a JSON object to be sent in the request body: {0}")]
    MalformedBody(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn key_not_found() -> Self { Self::KeyNotFound("Data key not found in the database.".into()) }

    pub fn key_missing() -> Self { Self::KeyNotFound("Data key not provided.".into()) }

    /// True for storage and serialization faults; false for rejections of the
    /// request itself (bad input, missing data, wrong passcode).
    pub fn is_internal(&self) -> bool { matches!(self, Self::Internal(_)) }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self { Self::Internal(e.to_string()) }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self { Self::Internal(e.to_string()) }
}
