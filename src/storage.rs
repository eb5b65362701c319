//! Storage backend for the service registry file

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Replace the content at `path` so readers see either the old or the
    /// new content, never a partial write
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path.
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;
}

/// Production storage backend using tokio::fs
#[derive(Debug, Default)]
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp registry file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write registry file")?;
        file.sync_all()
            .await
            .context("Failed to sync registry file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Failed to rename temp registry file")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read registry file: {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::RwLock;

    /// In-memory storage with error injection
    #[derive(Default)]
    pub struct MockStorage {
        files: Arc<RwLock<HashMap<PathBuf, String>>>,
        save_error: Arc<RwLock<Option<String>>>,
        /// Saves whose content contains this text fail
        reject_containing: Arc<RwLock<Option<String>>>,
        save_delay: Arc<RwLock<Duration>>,
        saves: AtomicUsize,
    }

    impl MockStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn with_file(path: &Path, content: &str) -> Self {
            let storage = Self::new();
            storage
                .files
                .write()
                .await
                .insert(path.to_path_buf(), content.to_string());
            storage
        }

        pub async fn get_file(&self, path: &Path) -> Option<String> {
            self.files.read().await.get(path).cloned()
        }

        /// Number of `save` calls, failed ones included
        pub fn save_count(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        /// Fail the next save with `error`
        pub async fn set_save_error(&self, error: &str) {
            *self.save_error.write().await = Some(error.to_string());
        }

        pub async fn reject_saves_containing(&self, text: &str) {
            *self.reject_containing.write().await = Some(text.to_string());
        }

        pub async fn set_save_delay(&self, delay: Duration) {
            *self.save_delay.write().await = delay;
        }
    }

    #[async_trait]
    impl StorageBackend for MockStorage {
        async fn save(&self, path: &Path, content: &str) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);

            let delay = *self.save_delay.read().await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Some(error) = self.save_error.write().await.take() {
                return Err(anyhow::anyhow!(error));
            }
            if let Some(text) = self.reject_containing.read().await.as_deref()
                && content.contains(text)
            {
                return Err(anyhow::anyhow!("write rejected"));
            }

            self.files
                .write()
                .await
                .insert(path.to_path_buf(), content.to_string());
            Ok(())
        }

        async fn load(&self, path: &Path) -> Result<Option<String>> {
            Ok(self.files.read().await.get(path).cloned())
        }
    }
}
