use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use common::models::{Signal, SignalStatus};
use sqlx::sqlite::{self, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::{SignalStore, StoreError};

const SCHEMA: &str = include_str!("../../../sql/schema.sql");

/// One row per signal; `position` keeps the collection order.
pub struct SqliteSignalStore {
    pool: SqlitePool,
}

impl SqliteSignalStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .statement_cache_capacity(100);

        let pool = SqlitePool::connect_with(options).await?;
        info!(path = %path.display(), "Opened SQLite signal store");
        Self::with_pool(pool).await
    }

    /// Private in-memory database. A single connection keeps every query on the same database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn status_label(status: SignalStatus) -> &'static str {
    match status {
        SignalStatus::Open => "OPEN",
        SignalStatus::Closed => "CLOSED",
    }
}

#[async_trait]
impl SignalStore for SqliteSignalStore {
    async fn load(&self) -> Result<Vec<Signal>, StoreError> {
        let bodies: Vec<String> = sqlx::query_scalar("SELECT body FROM signals ORDER BY position")
            .fetch_all(&self.pool)
            .await?;

        let signals = bodies
            .iter()
            .map(|body| serde_json::from_str(body))
            .collect::<Result<Vec<Signal>, _>>()?;
        debug!(count = signals.len(), "Loaded signals from SQLite");
        Ok(signals)
    }

    async fn save(&self, signals: &[Signal]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM signals").execute(&mut *tx).await?;
        for (position, signal) in signals.iter().enumerate() {
            sqlx::query(
                r#"
                    INSERT INTO signals (
                        position, currency, signal_date, status, body
                    ) VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(position as i64)
            .bind(&signal.currency)
            .bind(signal.date.to_rfc3339())
            .bind(status_label(signal.status))
            .bind(serde_json::to_string(signal)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = signals.len(), "Saved signals to SQLite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SignalHistory;
    use crate::test_support::{closed_signal, signal};

    #[tokio::test]
    async fn test_empty_database_loads_empty() {
        let store = SqliteSignalStore::in_memory().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_replaces_rows_in_order() {
        let store = SqliteSignalStore::in_memory().await.unwrap();
        store
            .save(&[signal("BTCUSDT", 1), signal("ETHUSDT", 2)])
            .await
            .unwrap();

        let replacement = vec![signal("SOLUSDT", 3), signal("BTCUSDT", 1)];
        store.save(&replacement).await.unwrap();

        assert_eq!(store.load().await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn test_duplicate_identity_rolls_back_whole_save() {
        let store = SqliteSignalStore::in_memory().await.unwrap();
        let original = vec![signal("BTCUSDT", 1)];
        store.save(&original).await.unwrap();

        let result = store
            .save(&[signal("ETHUSDT", 2), signal("ETHUSDT", 2)])
            .await;

        assert!(matches!(result, Err(StoreError::Database(_))));
        assert_eq!(store.load().await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_trimmed_identity_can_be_stored_again() {
        let store = SqliteSignalStore::in_memory().await.unwrap();
        let mut history = SignalHistory::new(
            vec![closed_signal("BTCUSDT", 1), closed_signal("ETHUSDT", 2), signal("SOLUSDT", 3)],
            2,
        );
        store.save(history.signals()).await.unwrap();

        assert_eq!(history.enforce_retention(), 1);
        store.save(history.signals()).await.unwrap();

        // The trimmed row is gone, so reusing its (currency, date) is not a conflict.
        history.push(signal("BTCUSDT", 1));
        store.save(history.signals()).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded[2].is_open());
        assert_eq!(loaded[2].currency, "BTCUSDT");
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal_history.db");
        let signals = vec![signal("BTCUSDT", 1)];

        SqliteSignalStore::open(&path).await.unwrap().save(&signals).await.unwrap();
        let reopened = SqliteSignalStore::open(&path).await.unwrap();

        assert_eq!(reopened.load().await.unwrap(), signals);
    }
}
