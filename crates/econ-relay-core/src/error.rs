use thiserror::Error;

/// Errors produced by the relay pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("resolution error: {0}")]
    Resolution(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Whether this error was caused by the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RelayError::Cancelled)
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
