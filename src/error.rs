//! Error types for the Daybook core
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to the UI bridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store handle is gone and could not be rebuilt. Higher layers fail
    /// fast with this instead of silently no-opping.
    #[error("Store unavailable")]
    StoreUnavailable,

    #[error("No security settings record exists")]
    SecuritySettingsNotFound,

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("{0}")]
    Generic(String),
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
