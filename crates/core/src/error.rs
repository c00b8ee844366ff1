use thiserror::Error;

pub type SpotlineResult<T> = Result<T, SpotlineError>;

#[derive(Error, Debug)]
pub enum SpotlineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Response encoding error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SpotlineError {
    /// True for errors caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SpotlineError::Validation(_) | SpotlineError::NotFound(_) | SpotlineError::Conflict(_)
        )
    }
}

impl From<config::ConfigError> for SpotlineError {
    fn from(e: config::ConfigError) -> Self {
        SpotlineError::Config(e.to_string())
    }
}
