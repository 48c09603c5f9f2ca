use std::path::{Path, PathBuf};

use common::models::SignalDraft;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

const PROCESSED_DIR: &str = "processed";
const REJECTED_DIR: &str = "rejected";

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("Inbox I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Draft file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DraftDocument {
    Many(Vec<SignalDraft>),
    One(SignalDraft),
}

/// Directory of `*.json` draft files dropped by the parsing collaborator.
pub struct DraftInbox {
    dir: PathBuf,
}

impl DraftInbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn ensure_dirs(&self) -> Result<(), InboxError> {
        fs::create_dir_all(self.dir.join(PROCESSED_DIR)).await?;
        fs::create_dir_all(self.dir.join(REJECTED_DIR)).await?;
        Ok(())
    }

    /// Pending draft files, oldest name first.
    pub async fn pending(&self) -> Result<Vec<PathBuf>, InboxError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<SignalDraft>, InboxError> {
        let raw = fs::read_to_string(path).await?;
        let document: DraftDocument = serde_json::from_str(&raw).map_err(|source| InboxError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(match document {
            DraftDocument::Many(drafts) => drafts,
            DraftDocument::One(draft) => vec![draft],
        })
    }

    pub async fn mark_processed(&self, path: &Path) -> Result<PathBuf, InboxError> {
        self.move_into(path, PROCESSED_DIR).await
    }

    pub async fn mark_rejected(&self, path: &Path) -> Result<PathBuf, InboxError> {
        warn!(path = %path.display(), "Moving unreadable draft file aside");
        self.move_into(path, REJECTED_DIR).await
    }

    async fn move_into(&self, path: &Path, folder: &str) -> Result<PathBuf, InboxError> {
        let target_dir = self.dir.join(folder);
        fs::create_dir_all(&target_dir).await?;
        let file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        let target = target_dir.join(file_name);
        fs::rename(path, &target).await?;
        debug!(from = %path.display(), to = %target.display(), "Draft file moved");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::SignalType;
    use rust_decimal_macros::dec;

    const ONE: &str = r#"{
        "currency": "btc/usdt", "signal_type": "LONG", "entry": 100,
        "targets": ["110", "120"], "stop_loss": "95", "source": "channel-42"
    }"#;

    #[tokio::test]
    async fn test_missing_inbox_has_nothing_pending() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = DraftInbox::new(dir.path().join("absent"));
        assert!(inbox.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_single_and_batched_drafts() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = DraftInbox::new(dir.path());
        inbox.ensure_dirs().await.unwrap();
        std::fs::write(dir.path().join("a.json"), ONE).unwrap();
        std::fs::write(dir.path().join("b.json"), format!("[{ONE}, {ONE}]")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let pending = inbox.pending().await.unwrap();
        assert_eq!(pending.len(), 2);

        let first = inbox.read(&pending[0]).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].signal_type, SignalType::Long);
        assert_eq!(first[0].entry, dec!(100));
        assert_eq!(first[0].targets, vec![dec!(110), dec!(120)]);
        assert_eq!(inbox.read(&pending[1]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_files_move_to_outcome_folders() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = DraftInbox::new(dir.path());
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        std::fs::write(&good, ONE).unwrap();
        std::fs::write(&bad, "{\"currency\": ").unwrap();

        assert!(matches!(inbox.read(&bad).await, Err(InboxError::Parse { .. })));
        let rejected = inbox.mark_rejected(&bad).await.unwrap();
        let processed = inbox.mark_processed(&good).await.unwrap();

        assert!(rejected.ends_with("rejected/bad.json") && rejected.exists());
        assert!(processed.ends_with("processed/good.json") && processed.exists());
        assert!(inbox.pending().await.unwrap().is_empty());
    }
}
