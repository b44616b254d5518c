//! Application configuration constants
//!
//! Central location for all configuration constants, resource limits,
//! and validation boundaries used throughout the crate.

// ===== Store =====

/// Default file name for the on-device store
pub const DB_FILE_NAME: &str = "diary.db";

/// How long a single statement waits on a locked store before erroring.
/// The retry executor adds its own bounded backoff on top of this.
pub const BUSY_TIMEOUT_SECS: u64 = 30;

// ===== Contention Retry Policy =====

/// Maximum attempts before the final re-initialization fallback
pub const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry in milliseconds
pub const RETRY_INITIAL_DELAY_MS: u64 = 1000;

/// Multiplier applied to the delay after each failed attempt
pub const RETRY_BACKOFF_FACTOR: f64 = 1.5;

// ===== Pagination =====

/// Entries fetched on the first feed load
pub const INITIAL_LOAD_COUNT: i64 = 30;

/// Entries fetched per subsequent page
pub const LOAD_MORE_COUNT: i64 = 20;

// ===== Mood =====

/// Lowest mood value ("very bad")
pub const MOOD_MIN: u8 = 0;

/// Highest mood value ("great")
pub const MOOD_MAX: u8 = 5;

/// Substituted when a stored mood is null or out of range
pub const MOOD_NEUTRAL: u8 = 2;

// ===== Security =====

/// Minimum PIN length in digits
pub const PIN_MIN_LENGTH: usize = 4;

/// Maximum PIN length in digits
pub const PIN_MAX_LENGTH: usize = 8;

/// Minimum number of connected points in an unlock pattern
pub const PATTERN_MIN_POINTS: usize = 4;

/// Cells on the 3x3 pattern grid; valid point indices are 0..9
pub const PATTERN_GRID_CELLS: u8 = 9;

/// Fixed salt appended to PIN codes before digesting.
/// Changing this invalidates every stored PIN hash.
pub const PIN_SALT: &str = "diary_app_salt";

/// Fixed salt appended to security question answers before digesting
pub const ANSWER_SALT: &str = "security_question_salt";

// ===== Defaults =====

/// Name given to the diary book seeded at first run
pub const DEFAULT_DIARY_BOOK_NAME: &str = "My Diary";

// ===== Settings Keys =====
// String key surface shared with the UI layer. `database_version` is
// reserved for the schema version manager.

pub const SETTING_SCHEMA_VERSION: &str = "database_version";
pub const SETTING_CURRENT_DIARY_BOOK: &str = "currentDiaryBookId";
pub const SETTING_THEME: &str = "theme";
pub const SETTING_CUSTOM_COLOR: &str = "customColor";
pub const SETTING_LANGUAGE: &str = "language";
pub const SETTING_GOOGLE_DRIVE_ENABLED: &str = "isGoogleDriveEnabled";
pub const SETTING_AUTO_BACKUP: &str = "autoBackup";
pub const SETTING_LAST_BACKUP_DATE: &str = "lastBackupDate";
