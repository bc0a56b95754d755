use thiserror::Error;

/// Errors for malformed input documents. Rule text never produces one.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported legacy protocol version '{0}'")]
    UnsupportedProtocol(String),

    #[error("Invalid script bundle: {0}")]
    InvalidBundle(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;
