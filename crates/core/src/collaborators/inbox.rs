//! Trigger source reading JSON files dropped into a directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use super::error::CollaboratorError;
use super::traits::TriggerSource;
use super::types::Trigger;

/// [`TriggerSource`] that consumes `*.json` files from an inbox directory.
///
/// Each file holds one [`Trigger`]. Parsed files are deleted; files that do
/// not parse are renamed to `*.rejected` so they are not read again.
pub struct InboxTriggerSource {
    dir: PathBuf,
}

impl InboxTriggerSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn pending_files(&self) -> Result<Vec<PathBuf>, CollaboratorError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl TriggerSource for InboxTriggerSource {
    async fn poll(&self) -> Result<Vec<Trigger>, CollaboratorError> {
        let mut triggers = Vec::new();

        for path in self.pending_files().await? {
            let body = match tokio::fs::read(&path).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read trigger file");
                    continue;
                }
            };
            match serde_json::from_slice::<Trigger>(&body) {
                Ok(trigger) => {
                    // Left in place, the file is picked up again on the next poll.
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %e, "Failed to consume trigger file");
                        continue;
                    }
                    info!(product_id = %trigger.product_id, kind = ?trigger.kind, "Received trigger");
                    triggers.push(trigger);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Rejecting unreadable trigger file");
                    if let Err(e) = tokio::fs::rename(&path, path.with_extension("rejected")).await {
                        warn!(path = %path.display(), error = %e, "Failed to set trigger file aside");
                    }
                }
            }
        }

        Ok(triggers)
    }
}
