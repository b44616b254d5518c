//! Daybook core
//!
//! Storage and security engine for the Daybook journaling app:
//! - `database`: embedded SQLite store, versioned schema migrations,
//!   contention-aware retry, and the entity repository
//! - `security`: PIN/pattern credential verification and biometric gating
//!
//! UI, image handling, and cloud backup live outside this crate and consume
//! it through the `Repository` and `SecurityService` surfaces.

pub mod config;
pub mod database;
pub mod error;
pub mod security;
