use cb_core::target::DistributionTarget;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Compile error: {0}")]
    Compile(#[from] cb_compiler::CompileError),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Host failed to reload {target}: {reason}")]
    HostReload {
        target: DistributionTarget,
        reason: String,
    },

    #[error("Reload of {0} ended without an outcome")]
    ReloadAborted(DistributionTarget),

    #[error("Unsupported request type: {0}")]
    UnsupportedRequest(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
