//! Error types for sync sessions.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] mirror_engine::Error),

    #[error("Session is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
