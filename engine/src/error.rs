//! Error types for the mirror engine.

use crate::BindingName;
use thiserror::Error;

/// All possible errors from the mirror engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Registry errors
    #[error("binding not found: {0}")]
    BindingNotFound(BindingName),

    #[error("binding already exists: {0}")]
    BindingAlreadyExists(BindingName),

    #[error("binding name must not be empty")]
    EmptyBindingName,

    #[error("binding name is reserved: {0}")]
    ReservedBindingName(BindingName),

    // Path errors
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::BindingNotFound("posts".into());
        assert_eq!(err.to_string(), "binding not found: posts");

        let err = Error::ReservedBindingName("_status".into());
        assert_eq!(err.to_string(), "binding name is reserved: _status");

        let err = Error::InvalidPath {
            path: "a//b".into(),
            reason: "empty segment".into(),
        };
        assert_eq!(err.to_string(), "invalid path 'a//b': empty segment");
    }
}
