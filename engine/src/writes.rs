//! Write tracking per remote path.
//!
//! Writes are fire-and-forget. The tracker only records which writes are in
//! flight and which failed; errors accumulate until explicitly cleared.

use crate::{Path, RemoteError, Timestamp, WriteId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A failed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteError {
    pub write_id: WriteId,
    pub error: RemoteError,
    /// When the failure was reported (milliseconds since epoch)
    pub failed_at: Timestamp,
}

/// In-flight writes and write errors by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTracker {
    pub processing: BTreeMap<Path, Vec<WriteId>>,
    pub errors: BTreeMap<Path, Vec<WriteError>>,
}

impl WriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a write as started.
    pub fn start(&mut self, path: &str, id: &str) -> bool {
        let ids = self.processing.entry(path.to_string()).or_default();
        if ids.iter().any(|existing| existing == id) {
            return false;
        }
        ids.push(id.to_string());
        true
    }

    /// Mark a write as finished, successfully or not.
    ///
    /// The path keeps an empty entry once its last write finishes.
    pub fn finish(&mut self, path: &str, id: &str) -> bool {
        match self.processing.get_mut(path) {
            Some(ids) => {
                let before = ids.len();
                ids.retain(|existing| existing != id);
                ids.len() != before
            }
            None => false,
        }
    }

    /// Record a failure.
    pub fn record_error(&mut self, path: &str, error: WriteError) {
        self.errors.entry(path.to_string()).or_default().push(error);
    }

    /// Drop all recorded errors for a path.
    pub fn clear_errors(&mut self, path: &str) -> bool {
        match self.errors.get_mut(path) {
            Some(errors) if !errors.is_empty() => {
                errors.clear();
                true
            }
            _ => false,
        }
    }

    /// Check if any write to `path` is in flight.
    pub fn is_processing(&self, path: &str) -> bool {
        self.processing.get(path).is_some_and(|ids| !ids.is_empty())
    }

    /// Errors recorded for `path`.
    pub fn errors_for(&self, path: &str) -> &[WriteError] {
        self.errors.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RemoteErrorCode;

    fn failure(id: &str) -> WriteError {
        WriteError {
            write_id: id.into(),
            error: RemoteError::new(RemoteErrorCode::PermissionDenied, "denied"),
            failed_at: 1000,
        }
    }

    #[test]
    fn start_and_finish() {
        let mut writes = WriteTracker::new();
        assert!(writes.start("posts", "w1"));
        assert!(writes.start("posts", "w2"));
        assert!(!writes.start("posts", "w1"));
        assert!(writes.is_processing("posts"));

        assert!(writes.finish("posts", "w1"));
        assert!(writes.finish("posts", "w2"));
        assert!(!writes.finish("posts", "w2"));
        assert!(!writes.is_processing("posts"));
        assert_eq!(writes.processing.get("posts"), Some(&vec![]));
    }

    #[test]
    fn errors_accumulate_until_cleared() {
        let mut writes = WriteTracker::new();
        writes.record_error("posts", failure("w1"));
        writes.start("posts", "w2");
        writes.record_error("posts", failure("w2"));
        assert_eq!(writes.errors_for("posts").len(), 2);

        assert!(writes.clear_errors("posts"));
        assert!(writes.errors_for("posts").is_empty());
        assert!(!writes.clear_errors("posts"));
        assert!(!writes.clear_errors("unknown"));
    }
}
