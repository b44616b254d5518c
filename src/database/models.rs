//! Database models
//!
//! Rust structs representing store entities. All models use serde for
//! serialization to the UI bridge. Timestamps are epoch milliseconds.

use crate::config;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// A diary book groups entries. Exactly one book carries the default flag
/// after first initialization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiaryBook {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_default: bool,
}

/// Location captured alongside an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

/// Open metadata attached to an entry. Unknown keys written by newer app
/// versions survive the round trip through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single diary entry. `tags`, `images`, and `metadata` are stored as JSON
/// text blobs and decoded with an empty default when malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: String,
    pub diary_book_id: String,
    pub title: String,
    pub content: String,
    pub mood: u8,
    pub created_at: i64,
    pub updated_at: i64,
    pub pinned: bool,
    pub is_encrypted: bool,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub metadata: EntryMetadata,
}

/// Create entry request. A missing `diary_book_id` resolves to the currently
/// selected book.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateEntryRequest {
    pub diary_book_id: Option<String>,
    pub title: String,
    pub content: String,
    pub mood: u8,
    pub pinned: bool,
    pub is_encrypted: bool,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub metadata: EntryMetadata,
}

/// Partial update: only supplied fields are overwritten.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEntryRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub mood: Option<u8>,
    pub pinned: Option<bool>,
    pub is_encrypted: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    pub metadata: Option<EntryMetadata>,
}

/// Application setting, last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// Configured unlock method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    Pin,
    Pattern,
    Biometric,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Pin => "pin",
            LockType::Pattern => "pattern",
            LockType::Biometric => "biometric",
        }
    }
}

impl FromStr for LockType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pin" => Ok(LockType::Pin),
            "pattern" => Ok(LockType::Pattern),
            "biometric" => Ok(LockType::Biometric),
            _ => Err(()),
        }
    }
}

/// A security question with its hashed answer. Plaintext answers are never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SecurityQuestion {
    pub id: String,
    pub question: String,
    pub answer_hash: String,
}

/// The single logical security settings record. Writes are upsert-by-replace;
/// no history is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub is_enabled: bool,
    pub lock_type: LockType,
    /// Salted digest of the PIN, never the plaintext
    pub pin_code: Option<String>,
    /// Serialized pattern point sequence
    pub pattern: Option<String>,
    pub biometric_enabled: bool,
    pub backup_unlock_enabled: bool,
    pub security_questions: Vec<SecurityQuestion>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SecuritySettings {
    /// Initial record written before any factor is configured.
    pub fn disabled(now: i64) -> Self {
        Self {
            is_enabled: false,
            lock_type: LockType::Pin,
            pin_code: None,
            pattern: None,
            biometric_enabled: false,
            backup_unlock_enabled: false,
            security_questions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial security settings update. The doubled `Option` on the secret
/// fields distinguishes "leave untouched" (`None`) from "clear"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSecuritySettings {
    pub is_enabled: Option<bool>,
    pub lock_type: Option<LockType>,
    pub pin_code: Option<Option<String>>,
    pub pattern: Option<Option<String>>,
    pub biometric_enabled: Option<bool>,
    pub backup_unlock_enabled: Option<bool>,
    pub security_questions: Option<Vec<SecurityQuestion>>,
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Timestamp-derived id with a random suffix. Not globally unique, but
/// collision odds are negligible for on-device data.
pub(crate) fn new_entity_id() -> String {
    let millis = now_ms().max(0) as u64;
    let mut id = to_base36(millis);

    let mut rng = rand::thread_rng();
    for _ in 0..8 {
        id.push(BASE36[rng.gen_range(0..BASE36.len())] as char);
    }
    id
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.iter().rev().map(|&b| b as char).collect()
}

/// Clamp a stored mood into range, defaulting to neutral when the value is
/// null or out of range. Legacy rows may hold anything.
pub(crate) fn normalize_mood(raw: Option<i64>) -> u8 {
    match raw {
        Some(m) if (config::MOOD_MIN as i64..=config::MOOD_MAX as i64).contains(&m) => m as u8,
        _ => config::MOOD_NEUTRAL,
    }
}
