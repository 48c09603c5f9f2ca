use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::models::Signal;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

use crate::{SignalStore, StoreError};

/// Pretty-printed JSON array on disk, replaced wholesale on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SignalStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<Signal>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No signal history yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let signals: Vec<Signal> = serde_json::from_str(&raw)?;
        debug!(count = signals.len(), path = %self.path.display(), "Loaded signals");
        Ok(signals)
    }

    async fn save(&self, signals: &[Signal]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(signals)?;

        // A crash mid-write leaves only the temp file behind. The data is
        // flushed before the rename so the new name never points at a hole.
        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &self.path).await?;

        debug!(count = signals.len(), path = %self.path.display(), "Saved signals");
        Ok(())
    }
}
