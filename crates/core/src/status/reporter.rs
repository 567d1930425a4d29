//! Atomic publication of the status document.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::{NamedTempFile, PersistError};
use tracing::{debug, warn};

use super::document::StatusDocument;

/// Bounded retry for replacing the status file.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Writes the status document so readers only ever see a complete file.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    path: PathBuf,
    retry: RetryPolicy,
}

impl StatusReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Publish a document. Returns whether it reached the status path.
    ///
    /// Failures are logged and swallowed; the caller never fails because
    /// of the status file.
    pub async fn publish(&self, doc: &StatusDocument) -> bool {
        let tmp = match self.stage(doc) {
            Ok(tmp) => tmp,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to stage status document");
                return false;
            }
        };

        let mut tmp = tmp;
        for attempt in 0..self.retry.attempts {
            match tmp.persist(&self.path) {
                Ok(_) => return true,
                Err(PersistError { error, file }) if is_transient(&error) => {
                    debug!(attempt, error = %error, "Status file busy, retrying");
                    tmp = file;
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(PersistError { error, file }) => {
                    debug!(error = %error, "Status replace failed");
                    tmp = file;
                    break;
                }
            }
        }

        // Last resort: clear the destination, then move into place.
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(error = %e, "Could not remove old status file");
            }
        }
        match tmp.persist(&self.path) {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e.error, "Dropping status update");
                false
            }
        }
    }

    fn stage(&self, doc: &StatusDocument) -> io::Result<NamedTempFile> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let body = serde_json::to_vec_pretty(doc).map_err(io::Error::other)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy
    )
}

/// Read the status document at `path`.
///
/// Returns `None` when the file is missing or does not hold a JSON object.
pub fn read_status(path: &Path) -> Option<StatusDocument> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}
