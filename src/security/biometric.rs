//! Biometric capability interface
//!
//! Device biometrics live outside this crate. The engine consumes them
//! through this trait: report availability, run one authentication attempt,
//! report success or failure. Nothing here forces a fallback path; the
//! caller offers PIN/pattern when an attempt fails.

use async_trait::async_trait;
use serde::Serialize;

/// Result of a single device authentication attempt.
#[derive(Debug, Clone, Serialize)]
pub struct BiometricOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl BiometricOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait BiometricAuthenticator: Send + Sync {
    /// Hardware present AND at least one credential enrolled.
    fn is_available(&self) -> bool;

    /// Run one device authentication prompt.
    async fn authenticate(&self) -> BiometricOutcome;
}

/// Stand-in for platforms without biometric hardware.
pub struct NoBiometrics;

#[async_trait]
impl BiometricAuthenticator for NoBiometrics {
    fn is_available(&self) -> bool {
        false
    }

    async fn authenticate(&self) -> BiometricOutcome {
        BiometricOutcome::failure("biometric hardware unavailable")
    }
}
