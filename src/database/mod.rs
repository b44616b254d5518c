//! Database module
//!
//! This module provides all store functionality including:
//! - The `Database` handle owning the live connection
//! - Schema version management and migrations
//! - Model definitions
//! - Repository layer for CRUD operations
//! - Contention-aware retry around every operation

pub mod models;
pub mod repository;
pub mod retry;
pub mod schema;

pub use models::*;
pub use repository::Repository;
pub use retry::RetryPolicy;

use crate::config;
use crate::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Build connection options shared by migration and application connections.
fn connect_options(db_path: &Path) -> std::result::Result<SqliteConnectOptions, sqlx::Error> {
    SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display())).map(
        |opts| {
            opts.create_if_missing(true)
                .busy_timeout(Duration::from_secs(config::BUSY_TIMEOUT_SECS))
                .journal_mode(SqliteJournalMode::Wal)
                .pragma("temp_store", "memory")
                .foreign_keys(true)
        },
    )
}

/// Connect to the store file and bring its schema up to date.
///
/// Migrations run on a dedicated single-connection pool that is closed
/// before the application pool is created. This prevents schema-caching
/// issues where a connection opened before ALTER TABLE ADD COLUMN still
/// sees the old column count.
async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Phase 1 — run migrations on a single dedicated connection.
    let migration_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path)?)
        .await?;

    schema::initialize_schema(&migration_pool).await?;
    migration_pool.close().await;

    // Phase 2 — the application pool. One connection: the store file is the
    // shared resource, and serializing writers through a single connection
    // keeps contention inside SQLite's own busy handler.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path)?)
        .await?;

    Ok(pool)
}

/// Owned handle to the embedded store.
///
/// Lifecycle: constructed at startup via [`Database::open`], torn down with
/// [`Database::close`]. A fatal connection error empties the handle; the
/// retry executor rebuilds it on the next operation. Overlapping callers
/// during a rebuild serialize behind the internal mutex.
pub struct Database {
    db_path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
    retry: RetryPolicy,
}

impl Database {
    /// Open (and migrate) the store at `db_path` with the default retry policy.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        Self::open_with(db_path, RetryPolicy::default()).await
    }

    /// Open with an explicit retry policy.
    pub async fn open_with(db_path: impl Into<PathBuf>, retry: RetryPolicy) -> Result<Arc<Self>> {
        let db = Arc::new(Self {
            db_path: db_path.into(),
            pool: Mutex::new(None),
            retry,
        });

        tracing::info!("Opening store at: {:?}", db.db_path);
        db.reinitialize().await?;
        tracing::info!("Store opened successfully");

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Current pool, or `StoreUnavailable` when the handle is empty.
    pub(crate) async fn acquire(&self) -> Result<SqlitePool> {
        self.pool
            .lock()
            .await
            .clone()
            .ok_or(AppError::StoreUnavailable)
    }

    /// Drop the live pool so the next attempt rebuilds the connection.
    pub(crate) async fn invalidate(&self) {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
    }

    /// Tear down and rebuild the connection.
    ///
    /// A plain reopen is tried first. If that fails the store is assumed
    /// unrecoverable and is **recreated**: the file (and its WAL/SHM
    /// siblings) is deleted and a fresh store is created. Data loss is the
    /// accepted recovery of last resort. If recreation also fails the handle
    /// stays empty and the error surfaces.
    pub(crate) async fn reinitialize(&self) -> Result<SqlitePool> {
        let mut guard = self.pool.lock().await;

        if let Some(old) = guard.take() {
            old.close().await;
        }

        match connect(&self.db_path).await {
            Ok(pool) => {
                *guard = Some(pool.clone());
                Ok(pool)
            }
            Err(err) => {
                tracing::warn!("Store open failed ({}), recreating from scratch", err);
                match self.recreate().await {
                    Ok(pool) => {
                        *guard = Some(pool.clone());
                        tracing::warn!("Store recreated; previous contents discarded");
                        Ok(pool)
                    }
                    Err(recreate_err) => {
                        tracing::error!("Store recreate failed: {}", recreate_err);
                        Err(recreate_err)
                    }
                }
            }
        }
    }

    async fn recreate(&self) -> Result<SqlitePool> {
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{}{}", self.db_path.display(), suffix));
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        connect(&self.db_path).await
    }

    /// Close the handle. Subsequent operations re-open via the retry executor.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }
        tracing::info!("Store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_store_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");

        let db = Database::open(&path).await.unwrap();

        assert!(path.exists());
        db.close().await;
    }

    #[tokio::test]
    async fn test_acquire_after_close_fails_fast() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).await.unwrap();

        db.close().await;

        let result = db.acquire().await;
        assert!(matches!(result, Err(AppError::StoreUnavailable)));
    }

    #[tokio::test]
    async fn test_corrupt_store_is_recreated() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.db");

        // Not a SQLite file.
        std::fs::write(&path, b"definitely not a database").unwrap();

        let db = Database::open(&path).await.unwrap();

        // A fresh, working schema replaced the garbage.
        let version = db
            .with_retry(|pool| async move { schema::current_version(&pool).await })
            .await
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);

        db.close().await;
    }
}
