//! File system utils.

use std::{io::ErrorKind, path::Path};

use anyhow::Context;

pub struct FsHandler;

impl FsHandler {
    /// Create the output directory for materialized templates if it doesn't exist.
    pub async fn create_output_directory(path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create output directory {}", path.display()))?;
        tracing::debug!("Created output directory: {}", path.display());
        Ok(())
    }

    /// Remove a file, treating an already missing file as success.
    ///
    /// Returns whether a file was actually removed.
    pub async fn remove_if_exists(path: &Path) -> anyhow::Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!("Removed file: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::trace!("File already removed: {}", path.display());
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}
