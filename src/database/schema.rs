//! Schema version manager and migration engine
//!
//! The schema version is an integer persisted in the `settings` table under
//! the reserved `database_version` key. It only ever increases. Migrations
//! are an ordered list of versioned steps, each re-entrant: re-running a step
//! against an already-migrated store must not corrupt data, so table creates
//! use IF NOT EXISTS and "duplicate column" errors are swallowed.
//!
//! Version detection for stores that predate the version key:
//! no `settings` table at all means a fresh store (version 0); a `settings`
//! table without the key means a legacy version 1 store.

use super::models::{new_entity_id, now_ms};
use crate::config;
use crate::error::{AppError, Result};
use sqlx::SqlitePool;

/// Version written by a fully migrated store.
pub const SCHEMA_VERSION: i64 = 3;

const DIARY_BOOKS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS diary_books (
        id TEXT PRIMARY KEY,
        name TEXT,
        created_at INTEGER,
        updated_at INTEGER,
        is_default INTEGER DEFAULT 0
    )
"#;

const SETTINGS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT
    )
"#;

/// Entry table columns shared by the fresh-create path and the v1 -> v2
/// rebuild. The foreign key is enforced from version 2 onwards.
const DIARIES_COLUMNS: &str = r#"
        id TEXT PRIMARY KEY,
        diary_book_id TEXT,
        title TEXT,
        content TEXT,
        mood INTEGER DEFAULT 2,
        created_at INTEGER,
        updated_at INTEGER,
        pinned INTEGER DEFAULT 0,
        is_encrypted INTEGER DEFAULT 0,
        tags TEXT,
        images TEXT,
        metadata TEXT,
        FOREIGN KEY (diary_book_id) REFERENCES diary_books (id)
"#;

const SECURITY_TABLES: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS security_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        is_enabled INTEGER NOT NULL DEFAULT 0,
        lock_type TEXT NOT NULL DEFAULT 'pin',
        pin_code TEXT,
        pattern TEXT,
        biometric_enabled INTEGER NOT NULL DEFAULT 0,
        backup_unlock_enabled INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS security_questions (
        id TEXT PRIMARY KEY,
        question TEXT NOT NULL,
        answer_hash TEXT NOT NULL,
        position INTEGER NOT NULL
    )
    "#,
];

const DIARY_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_diaries_created_at ON diaries(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_diaries_mood ON diaries(mood)",
    "CREATE INDEX IF NOT EXISTS idx_diaries_pinned ON diaries(pinned)",
    "CREATE INDEX IF NOT EXISTS idx_diaries_diary_book_id ON diaries(diary_book_id)",
];

/// Bring the store schema up to [`SCHEMA_VERSION`].
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    let mut version = current_version(pool).await?;
    tracing::info!("Current schema version: {}", version);

    if version == 0 {
        // Fresh store: create everything at once and jump straight to the
        // current version.
        create_fresh_schema(pool).await?;
        set_version(pool, SCHEMA_VERSION).await?;
        tracing::info!("Created fresh schema at version {}", SCHEMA_VERSION);
        return Ok(());
    }

    while version < SCHEMA_VERSION {
        let next = apply_migration(pool, version).await?;
        set_version(pool, next).await?;
        tracing::info!("Migrated schema: v{} -> v{}", version, next);
        version = next;
    }

    Ok(())
}

/// Read the persisted schema version.
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let settings_table: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'settings'",
    )
    .fetch_optional(pool)
    .await?;

    if settings_table.is_none() {
        return Ok(0);
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(config::SETTING_SCHEMA_VERSION)
        .fetch_optional(pool)
        .await?;

    // A settings table without the version key is a legacy v1 store.
    Ok(match value {
        Some(raw) => raw.parse().unwrap_or(1),
        None => 1,
    })
}

async fn set_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
        .bind(config::SETTING_SCHEMA_VERSION)
        .bind(version.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Run the single step that lifts the schema off `from`, returning the
/// version it reached.
async fn apply_migration(pool: &SqlitePool, from: i64) -> Result<i64> {
    match from {
        1 => migrate_v1_to_v2(pool).await.map(|_| 2),
        2 => migrate_v2_to_v3(pool).await.map(|_| 3),
        v => Err(AppError::Generic(format!(
            "no migration path from schema version {}",
            v
        ))),
    }
}

async fn create_fresh_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(DIARY_BOOKS_TABLE).execute(pool).await?;
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS diaries ({})",
        DIARIES_COLUMNS
    ))
    .execute(pool)
    .await?;
    sqlx::query(SETTINGS_TABLE).execute(pool).await?;
    for stmt in SECURITY_TABLES {
        sqlx::query(stmt).execute(pool).await?;
    }
    for stmt in DIARY_INDEXES {
        sqlx::query(stmt).execute(pool).await?;
    }

    ensure_default_book(pool).await?;
    Ok(())
}

/// Seed the default diary book unless one already exists. Idempotent so that
/// re-running a migration never produces a second default.
async fn ensure_default_book(pool: &SqlitePool) -> Result<String> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM diary_books WHERE is_default = 1")
            .fetch_optional(pool)
            .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = new_entity_id();
    let now = now_ms();
    sqlx::query(
        "INSERT INTO diary_books (id, name, created_at, updated_at, is_default) VALUES (?, ?, ?, ?, 1)",
    )
    .bind(&id)
    .bind(config::DEFAULT_DIARY_BOOK_NAME)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

fn is_duplicate_column(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("duplicate column name"))
}

/// v1 -> v2: introduce diary books and attach every entry to one.
///
/// SQLite cannot add a foreign key with ALTER TABLE, so after the backfill
/// the entries table is rebuilt under the constraint-carrying schema
/// (temp table, copy, drop, rename).
async fn migrate_v1_to_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query(DIARY_BOOKS_TABLE).execute(pool).await?;
    let default_id = ensure_default_book(pool).await?;

    if let Err(err) = sqlx::query("ALTER TABLE diaries ADD COLUMN diary_book_id TEXT")
        .execute(pool)
        .await
    {
        if !is_duplicate_column(&err) {
            return Err(err.into());
        }
        tracing::debug!("diary_book_id column already present, skipping add");
    }

    // Orphaned entries join the default book before the constraint lands.
    sqlx::query("UPDATE diaries SET diary_book_id = ? WHERE diary_book_id IS NULL")
        .bind(&default_id)
        .execute(pool)
        .await?;

    let mut tx = pool.begin().await?;
    sqlx::query(&format!(
        "CREATE TABLE diaries_migrated ({})",
        DIARIES_COLUMNS
    ))
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        r#"
        INSERT INTO diaries_migrated
        SELECT id, diary_book_id, title, content, mood, created_at, updated_at,
               pinned, is_encrypted, tags, images, metadata
        FROM diaries
        "#,
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query("DROP TABLE diaries").execute(&mut *tx).await?;
    sqlx::query("ALTER TABLE diaries_migrated RENAME TO diaries")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    for stmt in DIARY_INDEXES {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}

/// v2 -> v3: add the security tables. IF NOT EXISTS makes a rerun a no-op.
async fn migrate_v2_to_v3(pool: &SqlitePool) -> Result<()> {
    for stmt in SECURITY_TABLES {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
