//! Storage backends for the TTL cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use catalog_core::error::{FetchError, Result};
use catalog_core::traits::Storage;

/// In-memory storage.
///
/// Keeps the last saved snapshot so a second cache opened on the same
/// instance sees earlier writes, which is how tests simulate a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage pre-filled with raw items.
    pub fn with_items(items: HashMap<String, String>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    /// Returns a copy of the raw items.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.items.read().clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&self) -> Result<HashMap<String, String>> {
        Ok(self.snapshot())
    }

    async fn save(&self, items: &HashMap<String, String>) -> Result<()> {
        *self.items.write() = items.clone();
        Ok(())
    }
}

/// File-based storage.
///
/// # File Format
///
/// One JSON object mapping storage keys to blob strings:
///
/// ```text
/// { "catalog-cache:top:anime:1": "{\"data\":...,\"writtenAt\":1718000000000}", ... }
/// ```
///
/// Writes go to a temp file that is then renamed over the target. A file that
/// cannot be parsed loads as empty, so a damaged cache costs a refetch rather
/// than a failed start.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Creates storage backed by `path`. The file is created on first save.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Storage for FileStorage {
    #[instrument(skip(self), fields(path = ?self.path))]
    async fn load(&self) -> Result<HashMap<String, String>> {
        let contents = match fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache file yet");
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(FetchError::Storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        match serde_json::from_slice::<HashMap<String, String>>(&contents) {
            Ok(items) => {
                info!(count = items.len(), "Loaded cache file");
                Ok(items)
            }
            Err(e) => {
                warn!(error = %e, "Cache file is unreadable, starting empty");
                Ok(HashMap::new())
            }
        }
    }

    #[instrument(skip(self, items), fields(path = ?self.path, count = items.len()))]
    async fn save(&self, items: &HashMap<String, String>) -> Result<()> {
        let serialized = serde_json::to_vec(items)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Write atomically (write to temp, then rename)
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&serialized).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        debug!("Cache file saved");
        Ok(())
    }
}
