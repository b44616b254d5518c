//! Contention-aware retry executor
//!
//! Every repository operation funnels through [`Database::with_retry`]. The
//! store file may be contended by other processes or by prior in-flight
//! operations, so transient lock/closed errors are classified and retried
//! with bounded exponential backoff instead of surfacing to callers.

use super::Database;
use crate::config;
use crate::error::{AppError, Result};
use sqlx::SqlitePool;
use std::future::Future;
use std::time::Duration;

/// Tagged classification of transient store faults.
///
/// Produced at the store-access boundary so the executor matches on kinds,
/// not on error message substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contention {
    /// SQLITE_BUSY / SQLITE_LOCKED: another writer holds the file
    Locked,
    /// The pool was closed underneath the operation
    Closed,
    /// A connection was released or never became available in time
    Released,
    /// The handle itself is gone and must be rebuilt
    Missing,
}

/// Map an error to its contention class, or `None` when it is not retryable.
pub fn classify(err: &AppError) -> Option<Contention> {
    match err {
        AppError::StoreUnavailable => Some(Contention::Missing),
        AppError::Database(sqlx::Error::PoolClosed) => Some(Contention::Closed),
        AppError::Database(sqlx::Error::PoolTimedOut) => Some(Contention::Released),
        AppError::Database(sqlx::Error::WorkerCrashed) => Some(Contention::Released),
        AppError::Database(sqlx::Error::Database(db)) => {
            // Extended result codes carry the primary code in the low byte
            // (517 = BUSY_SNAPSHOT -> 5, 262 = LOCKED_SHAREDCACHE -> 6).
            let primary = db
                .code()
                .and_then(|code| code.as_ref().parse::<i64>().ok())
                .map(|code| code & 0xff);
            match primary {
                Some(5) | Some(6) => Some(Contention::Locked),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Backoff schedule for the retry executor.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: config::RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(config::RETRY_INITIAL_DELAY_MS),
            backoff_factor: config::RETRY_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay
            .mul_f64(self.backoff_factor.powi(retry as i32))
    }
}

impl Database {
    /// Execute `op` against the store, retrying transient contention.
    ///
    /// Policy: up to `max_attempts` tries with exponential backoff. A missing
    /// handle at the start of an attempt triggers a full re-initialization
    /// first. After the budget is exhausted, one last full re-initialization
    /// and a single final attempt run; if that also fails, the *original*
    /// error is surfaced. Non-retryable errors propagate immediately.
    pub async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(SqlitePool) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.retry_policy();
        let mut first_err: Option<AppError> = None;

        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(policy.delay_for(attempt - 1)).await;
            }

            let pool = match self.acquire().await {
                Ok(pool) => pool,
                // Handle gone: a prior failure tore it down. Rebuild before
                // the attempt proper.
                Err(_) => match self.reinitialize().await {
                    Ok(pool) => pool,
                    Err(err) => {
                        first_err.get_or_insert(err);
                        continue;
                    }
                },
            };

            match op(pool).await {
                Ok(value) => return Ok(value),
                Err(err) => match classify(&err) {
                    Some(kind) => {
                        tracing::warn!(
                            attempt,
                            kind = ?kind,
                            "Store contention, will retry: {}",
                            err
                        );
                        if matches!(kind, Contention::Closed | Contention::Missing) {
                            self.invalidate().await;
                        }
                        first_err.get_or_insert(err);
                    }
                    None => return Err(err),
                },
            }
        }

        // Last resort: rebuild the handle once more and try a final time.
        tracing::warn!("Retry budget exhausted, reinitializing store for a final attempt");
        if let Ok(pool) = self.reinitialize().await {
            if let Ok(value) = op(pool).await {
                return Ok(value);
            }
        }

        Err(first_err.unwrap_or(AppError::StoreUnavailable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::path::Path;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 1.5,
        }
    }

    async fn raw_pool(path: &Path, busy_timeout: Duration) -> SqlitePool {
        let opts = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}?mode=rwc",
            path.display()
        ))
        .unwrap()
        .create_if_missing(true)
        .busy_timeout(busy_timeout)
        .journal_mode(SqliteJournalMode::Wal);

        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_classify_real_lock_as_contention() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("locked.db");

        let writer = raw_pool(&path, Duration::from_secs(5)).await;
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
            .execute(&writer)
            .await
            .unwrap();

        // Hold the write lock from one connection...
        let mut tx = writer.begin().await.unwrap();
        sqlx::query("INSERT INTO t (v) VALUES ('held')")
            .execute(&mut *tx)
            .await
            .unwrap();

        // ...and collide from a second connection that gives up immediately.
        let contender = raw_pool(&path, Duration::from_millis(0)).await;
        let err: AppError = sqlx::query("INSERT INTO t (v) VALUES ('blocked')")
            .execute(&contender)
            .await
            .unwrap_err()
            .into();

        assert_eq!(classify(&err), Some(Contention::Locked));

        tx.rollback().await.unwrap();
        contender.close().await;
        writer.close().await;
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates_immediately() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_with(temp.path().join("test.db"), fast_policy(5))
            .await
            .unwrap();

        let attempts = AtomicU32::new(0);
        let result: Result<()> = db
            .with_retry(|_pool| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::Generic("boom".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(AppError::Generic(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        db.close().await;
    }

    #[tokio::test]
    async fn test_succeeds_on_fifth_attempt_within_cap() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_with(temp.path().join("test.db"), fast_policy(5))
            .await
            .unwrap();

        let attempts = AtomicU32::new(0);
        let result = db
            .with_retry(|pool| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 4 {
                        return Err(AppError::StoreUnavailable);
                    }
                    let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await?;
                    Ok(one)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        db.close().await;
    }

    #[tokio::test]
    async fn test_final_reinit_attempt_after_exhaustion() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_with(temp.path().join("test.db"), fast_policy(2))
            .await
            .unwrap();

        // Fails through the whole budget, then succeeds on the post-exhaustion
        // attempt that follows the last full re-initialization.
        let attempts = AtomicU32::new(0);
        let result = db
            .with_retry(|_pool| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        return Err(AppError::StoreUnavailable);
                    }
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        db.close().await;
    }

    #[tokio::test]
    async fn test_surfaces_original_error_when_everything_fails() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_with(temp.path().join("test.db"), fast_policy(2))
            .await
            .unwrap();

        let result: Result<()> = db
            .with_retry(|_pool| async { Err(AppError::StoreUnavailable) })
            .await;

        assert!(matches!(result, Err(AppError::StoreUnavailable)));
        db.close().await;
    }

    #[tokio::test]
    async fn test_reinitializes_when_handle_is_missing() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_with(temp.path().join("test.db"), fast_policy(5))
            .await
            .unwrap();

        db.close().await;

        // The executor rebuilds the handle instead of failing fast.
        let one: i64 = db
            .with_retry(|pool| async move {
                let v: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await?;
                Ok(v)
            })
            .await
            .unwrap();

        assert_eq!(one, 1);
        db.close().await;
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 1.5,
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
    }
}
