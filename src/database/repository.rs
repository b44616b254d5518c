//! Repository layer for store operations
//!
//! CRUD over the four entity families: diary books, diary entries, settings,
//! and security settings. Every operation funnels through the contention
//! retry executor; callers never see transient lock errors unless the retry
//! budget is exhausted.

use super::models::*;
use super::Database;
use crate::config;
use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use sqlx::FromRow;
use std::sync::Arc;
use std::sync::Once;

/// Raw entry row as stored. Columns are nullable because legacy stores wrote
/// rows before NOT NULL discipline existed; decoding normalizes them.
#[derive(FromRow)]
struct EntryRow {
    id: String,
    diary_book_id: Option<String>,
    title: Option<String>,
    content: Option<String>,
    mood: Option<i64>,
    created_at: Option<i64>,
    updated_at: Option<i64>,
    pinned: Option<i64>,
    is_encrypted: Option<i64>,
    tags: Option<String>,
    images: Option<String>,
    metadata: Option<String>,
}

impl EntryRow {
    fn into_entry(self) -> DiaryEntry {
        let now = now_ms();
        DiaryEntry {
            id: self.id,
            diary_book_id: self.diary_book_id.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            mood: normalize_mood(self.mood),
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
            pinned: self.pinned.unwrap_or(0) != 0,
            is_encrypted: self.is_encrypted.unwrap_or(0) != 0,
            tags: decode_or_default(self.tags, "tags"),
            images: decode_or_default(self.images, "images"),
            metadata: decode_or_default(self.metadata, "metadata"),
        }
    }
}

#[derive(FromRow)]
struct SecurityRow {
    is_enabled: bool,
    lock_type: String,
    pin_code: Option<String>,
    pattern: Option<String>,
    biometric_enabled: bool,
    backup_unlock_enabled: bool,
    created_at: i64,
    updated_at: i64,
}

/// Decode a JSON text blob, substituting the default when the stored value
/// predates the JSON encoding or is otherwise malformed. The failure is
/// logged once per process and never surfaced to the caller.
fn decode_or_default<T: DeserializeOwned + Default>(raw: Option<String>, column: &'static str) -> T {
    let Some(raw) = raw else {
        return T::default();
    };
    if raw.is_empty() {
        return T::default();
    }
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            static DECODE_WARNED: Once = Once::new();
            DECODE_WARNED.call_once(|| {
                tracing::warn!("Malformed {} blob, substituting default: {}", column, err);
            });
            T::default()
        }
    }
}

/// Repository for store operations
#[derive(Clone)]
pub struct Repository {
    db: Arc<Database>,
}

impl Repository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // ===== Diary books =====

    /// Create a diary book. New books are never the default.
    pub async fn create_diary_book(&self, name: &str) -> Result<DiaryBook> {
        let id = new_entity_id();
        let now = now_ms();

        self.db
            .with_retry(|pool| {
                let id = id.clone();
                let name = name.to_string();
                async move {
                    sqlx::query(
                        "INSERT INTO diary_books (id, name, created_at, updated_at, is_default) VALUES (?, ?, ?, ?, 0)",
                    )
                    .bind(&id)
                    .bind(&name)
                    .bind(now)
                    .bind(now)
                    .execute(&pool)
                    .await?;
                    Ok(())
                }
            })
            .await?;

        tracing::debug!("Created diary book: {}", id);
        Ok(DiaryBook {
            id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            is_default: false,
        })
    }

    /// List all diary books, oldest first.
    pub async fn list_diary_books(&self) -> Result<Vec<DiaryBook>> {
        self.db
            .with_retry(|pool| async move {
                let books = sqlx::query_as::<_, DiaryBook>(
                    "SELECT * FROM diary_books ORDER BY created_at ASC",
                )
                .fetch_all(&pool)
                .await?;
                Ok(books)
            })
            .await
    }

    pub async fn get_diary_book(&self, id: &str) -> Result<Option<DiaryBook>> {
        self.db
            .with_retry(|pool| {
                let id = id.to_string();
                async move {
                    let book =
                        sqlx::query_as::<_, DiaryBook>("SELECT * FROM diary_books WHERE id = ?")
                            .bind(&id)
                            .fetch_optional(&pool)
                            .await?;
                    Ok(book)
                }
            })
            .await
    }

    /// Rename a diary book. Missing ids are a silent no-op.
    pub async fn rename_diary_book(&self, id: &str, name: &str) -> Result<()> {
        let now = now_ms();
        self.db
            .with_retry(|pool| {
                let id = id.to_string();
                let name = name.to_string();
                async move {
                    sqlx::query("UPDATE diary_books SET name = ?, updated_at = ? WHERE id = ?")
                        .bind(&name)
                        .bind(now)
                        .bind(&id)
                        .execute(&pool)
                        .await?;
                    Ok(())
                }
            })
            .await
    }

    /// The book flagged as default, seeded at first run.
    pub async fn default_diary_book(&self) -> Result<Option<DiaryBook>> {
        self.db
            .with_retry(|pool| async move {
                let book = sqlx::query_as::<_, DiaryBook>(
                    "SELECT * FROM diary_books WHERE is_default = 1",
                )
                .fetch_optional(&pool)
                .await?;
                Ok(book)
            })
            .await
    }

    /// The currently selected book id: the stored setting if present,
    /// otherwise the default book.
    pub async fn current_diary_book_id(&self) -> Result<Option<String>> {
        if let Some(id) = self.get_setting(config::SETTING_CURRENT_DIARY_BOOK).await? {
            if !id.is_empty() {
                return Ok(Some(id));
            }
        }
        Ok(self.default_diary_book().await?.map(|book| book.id))
    }

    pub async fn set_current_diary_book_id(&self, id: &str) -> Result<()> {
        self.set_setting(config::SETTING_CURRENT_DIARY_BOOK, id).await
    }

    // ===== Diary entries =====

    /// Create an entry. Stamps `created_at == updated_at` and resolves the
    /// book to the current selection when unset.
    pub async fn create_entry(&self, req: CreateEntryRequest) -> Result<DiaryEntry> {
        let id = new_entity_id();
        let now = now_ms();

        let diary_book_id = match req.diary_book_id.filter(|b| !b.is_empty()) {
            Some(book) => book,
            None => self
                .current_diary_book_id()
                .await?
                .ok_or_else(|| AppError::Generic("no diary book available".to_string()))?,
        };

        let mood = req.mood.min(config::MOOD_MAX);
        let tags = serde_json::to_string(&req.tags)?;
        let images = serde_json::to_string(&req.images)?;
        let metadata = serde_json::to_string(&req.metadata)?;

        self.db
            .with_retry(|pool| {
                let id = id.clone();
                let diary_book_id = diary_book_id.clone();
                let title = req.title.clone();
                let content = req.content.clone();
                let tags = tags.clone();
                let images = images.clone();
                let metadata = metadata.clone();
                async move {
                    sqlx::query(
                        r#"
                        INSERT INTO diaries
                            (id, diary_book_id, title, content, mood, created_at, updated_at,
                             pinned, is_encrypted, tags, images, metadata)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&id)
                    .bind(&diary_book_id)
                    .bind(&title)
                    .bind(&content)
                    .bind(mood as i64)
                    .bind(now)
                    .bind(now)
                    .bind(req.pinned as i64)
                    .bind(req.is_encrypted as i64)
                    .bind(&tags)
                    .bind(&images)
                    .bind(&metadata)
                    .execute(&pool)
                    .await?;
                    Ok(())
                }
            })
            .await?;

        tracing::debug!("Created diary entry: {}", id);
        Ok(DiaryEntry {
            id,
            diary_book_id,
            title: req.title,
            content: req.content,
            mood,
            created_at: now,
            updated_at: now,
            pinned: req.pinned,
            is_encrypted: req.is_encrypted,
            tags: req.tags,
            images: req.images,
            metadata: req.metadata,
        })
    }

    /// Get an entry by id. Absent ids read back as `None`, not an error.
    pub async fn get_entry(&self, id: &str) -> Result<Option<DiaryEntry>> {
        self.db
            .with_retry(|pool| {
                let id = id.to_string();
                async move {
                    let row = sqlx::query_as::<_, EntryRow>("SELECT * FROM diaries WHERE id = ?")
                        .bind(&id)
                        .fetch_optional(&pool)
                        .await?;
                    Ok(row.map(EntryRow::into_entry))
                }
            })
            .await
    }

    /// List entries for one book, newest first, paged by limit/offset.
    /// `diary_book_id = None` resolves to the currently selected book.
    pub async fn list_entries(
        &self,
        limit: i64,
        offset: i64,
        diary_book_id: Option<&str>,
    ) -> Result<Vec<DiaryEntry>> {
        let book = match diary_book_id {
            Some(id) => id.to_string(),
            None => self.current_diary_book_id().await?.unwrap_or_default(),
        };

        self.db
            .with_retry(|pool| {
                let book = book.clone();
                async move {
                    let rows = sqlx::query_as::<_, EntryRow>(
                        r#"
                        SELECT * FROM diaries
                        WHERE diary_book_id = ?
                        ORDER BY created_at DESC
                        LIMIT ? OFFSET ?
                        "#,
                    )
                    .bind(&book)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&pool)
                    .await?;
                    Ok(rows.into_iter().map(EntryRow::into_entry).collect())
                }
            })
            .await
    }

    /// Partial update. Only supplied fields are overwritten; `updated_at` is
    /// always refreshed. A missing id is a silent no-op.
    pub async fn update_entry(&self, id: &str, req: UpdateEntryRequest) -> Result<()> {
        let now = now_ms();

        // Build dynamic update query. Everything binds as text; SQLite
        // column affinity coerces numerics back to INTEGER.
        let mut query = "UPDATE diaries SET updated_at = ?".to_string();
        let mut params: Vec<String> = vec![now.to_string()];

        if let Some(title) = &req.title {
            query.push_str(", title = ?");
            params.push(title.clone());
        }
        if let Some(content) = &req.content {
            query.push_str(", content = ?");
            params.push(content.clone());
        }
        if let Some(mood) = req.mood {
            query.push_str(", mood = ?");
            params.push(mood.min(config::MOOD_MAX).to_string());
        }
        if let Some(pinned) = req.pinned {
            query.push_str(", pinned = ?");
            params.push((pinned as i64).to_string());
        }
        if let Some(is_encrypted) = req.is_encrypted {
            query.push_str(", is_encrypted = ?");
            params.push((is_encrypted as i64).to_string());
        }
        if let Some(tags) = &req.tags {
            query.push_str(", tags = ?");
            params.push(serde_json::to_string(tags)?);
        }
        if let Some(images) = &req.images {
            query.push_str(", images = ?");
            params.push(serde_json::to_string(images)?);
        }
        if let Some(metadata) = &req.metadata {
            query.push_str(", metadata = ?");
            params.push(serde_json::to_string(metadata)?);
        }

        query.push_str(" WHERE id = ?");
        params.push(id.to_string());

        self.db
            .with_retry(|pool| {
                let query = query.clone();
                let params = params.clone();
                async move {
                    let mut q = sqlx::query(&query);
                    for param in &params {
                        q = q.bind(param);
                    }
                    q.execute(&pool).await?;
                    Ok(())
                }
            })
            .await?;

        tracing::debug!("Updated diary entry: {}", id);
        Ok(())
    }

    /// Delete an entry. A missing id is a silent no-op.
    pub async fn delete_entry(&self, id: &str) -> Result<()> {
        self.db
            .with_retry(|pool| {
                let id = id.to_string();
                async move {
                    sqlx::query("DELETE FROM diaries WHERE id = ?")
                        .bind(&id)
                        .execute(&pool)
                        .await?;
                    Ok(())
                }
            })
            .await?;

        tracing::debug!("Deleted diary entry: {}", id);
        Ok(())
    }

    /// Substring search across title, content, and the tags blob,
    /// newest first.
    pub async fn search_entries(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DiaryEntry>> {
        let term = format!("%{}%", query);

        self.db
            .with_retry(|pool| {
                let term = term.clone();
                async move {
                    let rows = sqlx::query_as::<_, EntryRow>(
                        r#"
                        SELECT * FROM diaries
                        WHERE title LIKE ? OR content LIKE ? OR tags LIKE ?
                        ORDER BY created_at DESC
                        LIMIT ? OFFSET ?
                        "#,
                    )
                    .bind(&term)
                    .bind(&term)
                    .bind(&term)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&pool)
                    .await?;
                    Ok(rows.into_iter().map(EntryRow::into_entry).collect())
                }
            })
            .await
    }

    // ===== Settings =====

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.db
            .with_retry(|pool| {
                let key = key.to_string();
                async move {
                    let value: Option<String> =
                        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                            .bind(&key)
                            .fetch_optional(&pool)
                            .await?;
                    Ok(value)
                }
            })
            .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .with_retry(|pool| {
                let key = key.to_string();
                let value = value.to_string();
                async move {
                    sqlx::query(
                        r#"
                        INSERT INTO settings (key, value) VALUES (?, ?)
                        ON CONFLICT(key) DO UPDATE SET value = excluded.value
                        "#,
                    )
                    .bind(&key)
                    .bind(&value)
                    .execute(&pool)
                    .await?;
                    Ok(())
                }
            })
            .await?;

        tracing::debug!("Set setting: {}", key);
        Ok(())
    }

    // ===== Security settings =====

    /// Read the single logical security settings record with its questions,
    /// ordered as configured.
    pub async fn get_security_settings(&self) -> Result<Option<SecuritySettings>> {
        self.db
            .with_retry(|pool| async move {
                let row = sqlx::query_as::<_, SecurityRow>(
                    "SELECT * FROM security_settings WHERE id = 1",
                )
                .fetch_optional(&pool)
                .await?;

                let Some(row) = row else {
                    return Ok(None);
                };

                let questions = sqlx::query_as::<_, SecurityQuestion>(
                    "SELECT id, question, answer_hash FROM security_questions ORDER BY position ASC",
                )
                .fetch_all(&pool)
                .await?;

                Ok(Some(SecuritySettings {
                    is_enabled: row.is_enabled,
                    lock_type: row.lock_type.parse().unwrap_or(LockType::Pin),
                    pin_code: row.pin_code.filter(|p| !p.is_empty()),
                    pattern: row.pattern.filter(|p| !p.is_empty()),
                    biometric_enabled: row.biometric_enabled,
                    backup_unlock_enabled: row.backup_unlock_enabled,
                    security_questions: questions,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                }))
            })
            .await
    }

    /// Upsert-by-replace: the record and its questions fully overwrite any
    /// previous state. Last write wins; no history is retained.
    pub async fn save_security_settings(&self, settings: &SecuritySettings) -> Result<()> {
        self.db
            .with_retry(|pool| {
                let settings = settings.clone();
                async move {
                    let mut tx = pool.begin().await?;

                    sqlx::query(
                        r#"
                        INSERT OR REPLACE INTO security_settings
                            (id, is_enabled, lock_type, pin_code, pattern,
                             biometric_enabled, backup_unlock_enabled, created_at, updated_at)
                        VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(settings.is_enabled)
                    .bind(settings.lock_type.as_str())
                    .bind(&settings.pin_code)
                    .bind(&settings.pattern)
                    .bind(settings.biometric_enabled)
                    .bind(settings.backup_unlock_enabled)
                    .bind(settings.created_at)
                    .bind(settings.updated_at)
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query("DELETE FROM security_questions")
                        .execute(&mut *tx)
                        .await?;

                    for (position, question) in settings.security_questions.iter().enumerate() {
                        sqlx::query(
                            "INSERT INTO security_questions (id, question, answer_hash, position) VALUES (?, ?, ?, ?)",
                        )
                        .bind(&question.id)
                        .bind(&question.question)
                        .bind(&question.answer_hash)
                        .bind(position as i64)
                        .execute(&mut *tx)
                        .await?;
                    }

                    tx.commit().await?;
                    Ok(())
                }
            })
            .await?;

        tracing::debug!("Saved security settings");
        Ok(())
    }

    /// Merge a partial update onto the existing record. Errors with
    /// `SecuritySettingsNotFound` when no record exists yet.
    pub async fn update_security_settings(
        &self,
        update: UpdateSecuritySettings,
    ) -> Result<SecuritySettings> {
        let mut settings = self
            .get_security_settings()
            .await?
            .ok_or(AppError::SecuritySettingsNotFound)?;

        if let Some(is_enabled) = update.is_enabled {
            settings.is_enabled = is_enabled;
        }
        if let Some(lock_type) = update.lock_type {
            settings.lock_type = lock_type;
        }
        if let Some(pin_code) = update.pin_code {
            settings.pin_code = pin_code;
        }
        if let Some(pattern) = update.pattern {
            settings.pattern = pattern;
        }
        if let Some(biometric_enabled) = update.biometric_enabled {
            settings.biometric_enabled = biometric_enabled;
        }
        if let Some(backup_unlock_enabled) = update.backup_unlock_enabled {
            settings.backup_unlock_enabled = backup_unlock_enabled;
        }
        if let Some(questions) = update.security_questions {
            settings.security_questions = questions;
        }
        settings.updated_at = now_ms();

        self.save_security_settings(&settings).await?;
        Ok(settings)
    }
}
