//! Credential verification engine
//!
//! Guards app entry: hashes and compares PIN codes, validates pattern
//! sequences, and gates on the biometric capability. Reads and writes the
//! single active security settings record through the repository.
//!
//! Hashes are a fixed salted SHA-256 digest, base64-encoded, matching the
//! format already on devices. Plaintext secrets are never persisted.

pub mod biometric;

pub use biometric::{BiometricAuthenticator, BiometricOutcome, NoBiometrics};

use crate::config;
use crate::database::{
    LockType, Repository, SecurityQuestion, SecuritySettings, UpdateSecuritySettings,
};
use crate::error::{AppError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

// ===== PIN =====

/// Salted digest of a PIN code, base64-encoded.
pub fn hash_pin(pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.update(config::PIN_SALT.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Enforce PIN constraints: 4-8 characters, digits only.
pub fn validate_pin(pin: &str) -> Result<()> {
    if pin.is_empty() {
        return Err(AppError::InvalidPin("PIN must not be empty".to_string()));
    }
    if pin.len() < config::PIN_MIN_LENGTH {
        return Err(AppError::InvalidPin(format!(
            "PIN must be at least {} digits",
            config::PIN_MIN_LENGTH
        )));
    }
    if pin.len() > config::PIN_MAX_LENGTH {
        return Err(AppError::InvalidPin(format!(
            "PIN must be at most {} digits",
            config::PIN_MAX_LENGTH
        )));
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::InvalidPin(
            "PIN must contain digits only".to_string(),
        ));
    }
    Ok(())
}

/// Validate the input, then compare its digest byte-for-byte against the
/// stored hash. Malformed input is an error, not a failed comparison.
pub fn verify_pin(input: &str, stored_hash: &str) -> Result<bool> {
    validate_pin(input)?;
    Ok(hash_pin(input) == stored_hash)
}

// ===== Security question answers =====

/// Salted digest of an answer, normalized (trimmed, lowercased) so that
/// capitalization and stray whitespace don't lock users out.
pub fn hash_answer(answer: &str) -> String {
    let normalized = answer.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(config::ANSWER_SALT.as_bytes());
    BASE64.encode(hasher.finalize())
}

pub fn verify_answer(input: &str, stored_hash: &str) -> bool {
    hash_answer(input) == stored_hash
}

// ===== Pattern =====

/// Serialized form of a drawn unlock pattern: ordered cell indices on the
/// 3x3 grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternData {
    pub dots: Vec<u8>,
    pub created_at: i64,
}

/// A valid pattern connects at least four points, all on the grid.
pub fn validate_pattern(dots: &[u8]) -> Result<()> {
    if dots.len() < config::PATTERN_MIN_POINTS {
        return Err(AppError::InvalidPattern(format!(
            "pattern must connect at least {} points",
            config::PATTERN_MIN_POINTS
        )));
    }
    if dots.iter().any(|&d| d >= config::PATTERN_GRID_CELLS) {
        return Err(AppError::InvalidPattern(
            "pattern points must lie on the 3x3 grid".to_string(),
        ));
    }
    Ok(())
}

pub fn serialize_pattern(dots: &[u8]) -> Result<String> {
    validate_pattern(dots)?;
    let data = PatternData {
        dots: dots.to_vec(),
        created_at: chrono::Utc::now().timestamp_millis(),
    };
    Ok(serde_json::to_string(&data)?)
}

pub fn deserialize_pattern(raw: &str) -> Result<PatternData> {
    let data: PatternData = serde_json::from_str(raw)
        .map_err(|_| AppError::InvalidPattern("stored pattern is malformed".to_string()))?;
    validate_pattern(&data.dots)?;
    Ok(data)
}

/// Exact ordered sequence equality; no partial credit.
pub fn verify_pattern(input: &[u8], stored: &str) -> Result<bool> {
    validate_pattern(input)?;
    let stored = deserialize_pattern(stored)?;
    Ok(stored.dots == input)
}

/// Question templates offered during security setup.
pub fn default_security_questions() -> Vec<&'static str> {
    vec![
        "What neighborhood did you live in as a child?",
        "What is your favorite food?",
        "What was the name of your first pet?",
        "What is your most memorable travel destination?",
        "What did you dream of becoming as a child?",
    ]
}

// ===== Lock state machine =====

/// App-entry gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockState {
    Locked,
    Unlocked,
}

/// Verification engine over the stored security settings.
///
/// Setup methods write full replacement records that clear competing
/// factors, so a configured lock is never ambiguously dual-active.
#[derive(Clone)]
pub struct SecurityService {
    repo: Repository,
    biometric: Arc<dyn BiometricAuthenticator>,
}

impl SecurityService {
    pub fn new(repo: Repository, biometric: Arc<dyn BiometricAuthenticator>) -> Self {
        Self { repo, biometric }
    }

    /// Locked iff security is enabled. A store without a settings record
    /// starts open.
    pub async fn initial_state(&self) -> Result<LockState> {
        match self.repo.get_security_settings().await? {
            Some(settings) if settings.is_enabled => Ok(LockState::Locked),
            _ => Ok(LockState::Unlocked),
        }
    }

    pub async fn unlock_with_pin(&self, input: &str) -> Result<LockState> {
        let settings = self.settings_or_err().await?;
        let stored = settings
            .pin_code
            .ok_or_else(|| AppError::InvalidPin("no PIN is configured".to_string()))?;

        if verify_pin(input, &stored)? {
            Ok(LockState::Unlocked)
        } else {
            Ok(LockState::Locked)
        }
    }

    pub async fn unlock_with_pattern(&self, dots: &[u8]) -> Result<LockState> {
        let settings = self.settings_or_err().await?;
        let stored = settings
            .pattern
            .ok_or_else(|| AppError::InvalidPattern("no pattern is configured".to_string()))?;

        if verify_pattern(dots, &stored)? {
            Ok(LockState::Unlocked)
        } else {
            Ok(LockState::Locked)
        }
    }

    /// One device authentication attempt. On failure the state stays Locked;
    /// offering the PIN/pattern fallback is the caller's decision.
    pub async fn unlock_with_biometric(&self) -> Result<LockState> {
        let settings = self.settings_or_err().await?;
        if !settings.biometric_enabled {
            return Err(AppError::Generic(
                "biometric unlock is not enabled".to_string(),
            ));
        }

        let outcome = self.biometric.authenticate().await;
        if outcome.success {
            Ok(LockState::Unlocked)
        } else {
            if let Some(error) = &outcome.error {
                tracing::warn!("Biometric authentication failed: {}", error);
            }
            Ok(LockState::Locked)
        }
    }

    /// Hardware present AND enrolled.
    pub fn biometric_available(&self) -> bool {
        self.biometric.is_available()
    }

    /// Enable the PIN lock. Clears any configured pattern and disables
    /// biometric.
    pub async fn set_pin(&self, pin: &str) -> Result<()> {
        validate_pin(pin)?;

        let mut settings = self.settings_or_default().await?;
        settings.is_enabled = true;
        settings.lock_type = LockType::Pin;
        settings.pin_code = Some(hash_pin(pin));
        settings.pattern = None;
        settings.biometric_enabled = false;
        settings.updated_at = now_ms();

        self.repo.save_security_settings(&settings).await?;
        tracing::info!("PIN lock configured");
        Ok(())
    }

    /// Enable the pattern lock. Clears any configured PIN and disables
    /// biometric.
    pub async fn set_pattern(&self, dots: &[u8]) -> Result<()> {
        let serialized = serialize_pattern(dots)?;

        let mut settings = self.settings_or_default().await?;
        settings.is_enabled = true;
        settings.lock_type = LockType::Pattern;
        settings.pattern = Some(serialized);
        settings.pin_code = None;
        settings.biometric_enabled = false;
        settings.updated_at = now_ms();

        self.repo.save_security_settings(&settings).await?;
        tracing::info!("Pattern lock configured");
        Ok(())
    }

    /// Enable or disable the biometric lock. Enabling clears the PIN and
    /// pattern factors; disabling while biometric was the active lock type
    /// disables the lock entirely.
    pub async fn set_biometric_enabled(&self, enabled: bool) -> Result<()> {
        if enabled && !self.biometric.is_available() {
            return Err(AppError::Generic(
                "biometric hardware unavailable or not enrolled".to_string(),
            ));
        }

        let mut settings = self.settings_or_default().await?;
        if enabled {
            settings.is_enabled = true;
            settings.lock_type = LockType::Biometric;
            settings.biometric_enabled = true;
            settings.pin_code = None;
            settings.pattern = None;
        } else {
            settings.biometric_enabled = false;
            if settings.lock_type == LockType::Biometric {
                settings.is_enabled = false;
            }
        }
        settings.updated_at = now_ms();

        self.repo.save_security_settings(&settings).await?;
        tracing::info!("Biometric lock {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Turn the lock off. Requires an existing settings record.
    pub async fn disable_lock(&self) -> Result<()> {
        self.repo
            .update_security_settings(UpdateSecuritySettings {
                is_enabled: Some(false),
                ..Default::default()
            })
            .await?;
        tracing::info!("App lock disabled");
        Ok(())
    }

    /// Store hashed answers for backup unlock. `answers` pairs each question
    /// text with its plaintext answer; only digests are persisted.
    pub async fn set_security_questions(&self, answers: Vec<(String, String)>) -> Result<()> {
        let questions = answers
            .into_iter()
            .enumerate()
            .map(|(i, (question, answer))| SecurityQuestion {
                id: (i + 1).to_string(),
                question,
                answer_hash: hash_answer(&answer),
            })
            .collect();

        self.repo
            .update_security_settings(UpdateSecuritySettings {
                security_questions: Some(questions),
                backup_unlock_enabled: Some(true),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    pub async fn verify_security_answer(&self, question_id: &str, answer: &str) -> Result<bool> {
        let settings = self.settings_or_err().await?;
        Ok(settings
            .security_questions
            .iter()
            .any(|q| q.id == question_id && verify_answer(answer, &q.answer_hash)))
    }

    async fn settings_or_err(&self) -> Result<SecuritySettings> {
        self.repo
            .get_security_settings()
            .await?
            .ok_or(AppError::SecuritySettingsNotFound)
    }

    async fn settings_or_default(&self) -> Result<SecuritySettings> {
        Ok(self
            .repo
            .get_security_settings()
            .await?
            .unwrap_or_else(|| SecuritySettings::disabled(now_ms())))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedBiometrics {
        available: bool,
        succeeds: bool,
    }

    #[async_trait]
    impl BiometricAuthenticator for FixedBiometrics {
        fn is_available(&self) -> bool {
            self.available
        }

        async fn authenticate(&self) -> BiometricOutcome {
            if self.succeeds {
                BiometricOutcome::success()
            } else {
                BiometricOutcome::failure("not recognized")
            }
        }
    }

    async fn create_service(biometric: FixedBiometrics) -> (SecurityService, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).await.unwrap();
        let repo = Repository::new(db);
        (SecurityService::new(repo, Arc::new(biometric)), temp)
    }

    fn no_biometrics() -> FixedBiometrics {
        FixedBiometrics {
            available: false,
            succeeds: false,
        }
    }

    #[test]
    fn test_pin_digest_round_trip() {
        for pin in ["0000", "1234", "98765432"] {
            assert!(verify_pin(pin, &hash_pin(pin)).unwrap());
        }
        assert!(!verify_pin("1235", &hash_pin("1234")).unwrap());
    }

    #[test]
    fn test_pin_validation_bounds() {
        assert!(matches!(validate_pin(""), Err(AppError::InvalidPin(_))));
        assert!(matches!(validate_pin("123"), Err(AppError::InvalidPin(_))));
        assert!(matches!(
            validate_pin("123456789"),
            Err(AppError::InvalidPin(_))
        ));
        assert!(matches!(
            validate_pin("12a4"),
            Err(AppError::InvalidPin(_))
        ));
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("12345678").is_ok());
    }

    #[test]
    fn test_pattern_serialization_round_trip() {
        let dots = [0u8, 1, 2, 4, 8, 6];
        let raw = serialize_pattern(&dots).unwrap();

        let data = deserialize_pattern(&raw).unwrap();
        assert_eq!(data.dots, dots);

        assert!(verify_pattern(&dots, &raw).unwrap());
        // Order matters; no partial credit.
        assert!(!verify_pattern(&[6, 8, 4, 2, 1, 0], &raw).unwrap());
        assert!(!verify_pattern(&[0, 1, 2, 4], &raw).unwrap());
    }

    #[test]
    fn test_pattern_validation() {
        assert!(matches!(
            validate_pattern(&[0, 1, 2]),
            Err(AppError::InvalidPattern(_))
        ));
        assert!(matches!(
            validate_pattern(&[0, 1, 2, 9]),
            Err(AppError::InvalidPattern(_))
        ));
        assert!(validate_pattern(&[0, 1, 2, 3]).is_ok());
    }

    #[test]
    fn test_malformed_stored_pattern_is_an_error() {
        assert!(matches!(
            verify_pattern(&[0, 1, 2, 3], "not json at all"),
            Err(AppError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_answer_hashing_normalizes() {
        let stored = hash_answer("Rex");
        assert!(verify_answer("rex", &stored));
        assert!(verify_answer("  REX  ", &stored));
        assert!(!verify_answer("max", &stored));
    }

    #[tokio::test]
    async fn test_initial_state_without_settings_is_unlocked() {
        let (service, _temp) = create_service(no_biometrics()).await;
        assert_eq!(service.initial_state().await.unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_pin_lock_flow() {
        let (service, _temp) = create_service(no_biometrics()).await;

        service.set_pin("4711").await.unwrap();
        assert_eq!(service.initial_state().await.unwrap(), LockState::Locked);

        assert_eq!(
            service.unlock_with_pin("0000").await.unwrap(),
            LockState::Locked
        );
        assert_eq!(
            service.unlock_with_pin("4711").await.unwrap(),
            LockState::Unlocked
        );
    }

    #[tokio::test]
    async fn test_setting_pattern_clears_pin() {
        let (service, _temp) = create_service(no_biometrics()).await;

        service.set_pin("4711").await.unwrap();
        service.set_pattern(&[0, 3, 6, 7, 8]).await.unwrap();

        let settings = service.settings_or_err().await.unwrap();
        assert_eq!(settings.lock_type, LockType::Pattern);
        assert!(settings.pin_code.is_none());
        assert!(!settings.biometric_enabled);

        assert_eq!(
            service.unlock_with_pattern(&[0, 3, 6, 7, 8]).await.unwrap(),
            LockState::Unlocked
        );
    }

    #[tokio::test]
    async fn test_enabling_biometric_clears_other_factors() {
        let (service, _temp) = create_service(FixedBiometrics {
            available: true,
            succeeds: true,
        })
        .await;

        service.set_pin("4711").await.unwrap();
        service.set_biometric_enabled(true).await.unwrap();

        let settings = service.settings_or_err().await.unwrap();
        assert_eq!(settings.lock_type, LockType::Biometric);
        assert!(settings.pin_code.is_none());
        assert!(settings.pattern.is_none());

        assert_eq!(
            service.unlock_with_biometric().await.unwrap(),
            LockState::Unlocked
        );
    }

    #[tokio::test]
    async fn test_biometric_failure_stays_locked() {
        let (service, _temp) = create_service(FixedBiometrics {
            available: true,
            succeeds: false,
        })
        .await;

        service.set_biometric_enabled(true).await.unwrap();

        assert_eq!(
            service.unlock_with_biometric().await.unwrap(),
            LockState::Locked
        );
    }

    #[tokio::test]
    async fn test_biometric_requires_hardware() {
        let (service, _temp) = create_service(no_biometrics()).await;

        let result = service.set_biometric_enabled(true).await;
        assert!(matches!(result, Err(AppError::Generic(_))));
    }

    #[tokio::test]
    async fn test_disable_lock_requires_existing_record() {
        let (service, _temp) = create_service(no_biometrics()).await;

        let result = service.disable_lock().await;
        assert!(matches!(result, Err(AppError::SecuritySettingsNotFound)));

        service.set_pin("4711").await.unwrap();
        service.disable_lock().await.unwrap();
        assert_eq!(service.initial_state().await.unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_security_questions_round_trip() {
        let (service, _temp) = create_service(no_biometrics()).await;

        service.set_pin("4711").await.unwrap();
        service
            .set_security_questions(vec![
                (
                    default_security_questions()[2].to_string(),
                    "Rex".to_string(),
                ),
                (
                    default_security_questions()[1].to_string(),
                    "Pizza".to_string(),
                ),
            ])
            .await
            .unwrap();

        assert!(service.verify_security_answer("1", "rex").await.unwrap());
        assert!(service.verify_security_answer("2", "PIZZA ").await.unwrap());
        assert!(!service.verify_security_answer("1", "pizza").await.unwrap());
        assert!(!service.verify_security_answer("9", "rex").await.unwrap());
    }
}
