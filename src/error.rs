use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayDbError {
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("{0}")]
    TimeoutError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl RelayDbError {
    /// Rewrap an error string the engine worker reported across the wire.
    /// Worker errors are already fully formatted; no extra prefix is added
    /// beyond the execution-error frame.
    #[must_use]
    pub fn from_wire(message: String) -> Self {
        RelayDbError::ExecutionError(message)
    }
}
