//! Relay configuration.
//!
//! Every field has a default, so an empty JSON object is a complete
//! configuration. Values are checked by [`RelayConfig::validate`] after
//! loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::feedback::VoiceSettings;
use crate::keyspace::PatientId;
use crate::store::RealtimeStoreConfig;
use crate::subscription::SubscriptionConfig;

/// Patient identity settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed pairing id; when set, it replaces any stored or generated id.
    pub pinned_patient_id: Option<String>,
    /// Name used when none has been stored.
    pub default_patient_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            pinned_patient_id: None,
            default_patient_name: "Patient".to_string(),
        }
    }
}

/// Voices for the two kinds of speech the patient device produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Caregiver-response announcements.
    pub announcement: VoiceSettings,
    /// "Alert sent" confirmations.
    pub confirmation: VoiceSettings,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            announcement: VoiceSettings::announcement(),
            confirmation: VoiceSettings::confirmation(),
        }
    }
}

/// Top-level relay configuration.
///
/// # Examples
///
/// ```
/// use care_relay::RelayConfig;
///
/// let cfg = RelayConfig::from_json_str(r#"{ "identity": { "pinned_patient_id": "patient-1" } }"#).unwrap();
/// assert_eq!(cfg.identity.pinned_patient_id.as_deref(), Some("patient-1"));
/// assert_eq!(cfg.store.snapshot_buffer, 64);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// In-memory store tuning.
    pub store: RealtimeStoreConfig,
    /// Callback subscription tuning.
    pub subscription: SubscriptionConfig,
    /// Voices.
    pub speech: SpeechConfig,
    /// Identity settings.
    pub identity: IdentityConfig,
}

impl RelayConfig {
    /// Smallest accepted queue or buffer size.
    pub const MIN_CAPACITY: usize = 1;
    /// Largest accepted poll or redelivery interval.
    pub const MAX_INTERVAL_MS: u64 = 60_000;

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// `Parse` for malformed JSON, `Invalid` for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        cfg.validate()
    }

    /// Read, parse and validate a JSON file.
    ///
    /// # Errors
    /// `Read` if the file cannot be read, otherwise as for
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Check every value, returning the config unchanged if it is usable.
    ///
    /// # Errors
    /// `Invalid` naming the first offending field.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.store.command_queue_capacity < Self::MIN_CAPACITY {
            return Err(invalid("store.command_queue_capacity", "must be at least 1"));
        }
        if self.store.snapshot_buffer < Self::MIN_CAPACITY {
            return Err(invalid("store.snapshot_buffer", "must be at least 1"));
        }
        check_interval("store.redelivery_interval_ms", self.store.redelivery_interval_ms)?;
        check_interval("subscription.poll_interval_ms", self.subscription.poll_interval_ms)?;

        check_voice("speech.announcement", &self.speech.announcement)?;
        check_voice("speech.confirmation", &self.speech.confirmation)?;

        if let Some(pinned) = &self.identity.pinned_patient_id {
            PatientId::new(pinned).map_err(|e| invalid("identity.pinned_patient_id", &e.to_string()))?;
        }
        if self.identity.default_patient_name.trim().is_empty() {
            return Err(invalid("identity.default_patient_name", "must not be blank"));
        }
        Ok(self)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn check_interval(field: &str, millis: u64) -> Result<(), ConfigError> {
    if millis == 0 || millis > RelayConfig::MAX_INTERVAL_MS {
        return Err(invalid(
            field,
            &format!("must be between 1 and {} ms (got {millis})", RelayConfig::MAX_INTERVAL_MS),
        ));
    }
    Ok(())
}

fn check_voice(field: &str, voice: &VoiceSettings) -> Result<(), ConfigError> {
    if voice.language.trim().is_empty() {
        return Err(invalid(&format!("{field}.language"), "must not be blank"));
    }
    if !(voice.rate > 0.0 && voice.rate <= 10.0) {
        return Err(invalid(&format!("{field}.rate"), "must be in (0, 10]"));
    }
    if !(voice.pitch > 0.0 && voice.pitch <= 2.0) {
        return Err(invalid(&format!("{field}.pitch"), "must be in (0, 2]"));
    }
    if !(0.0..=1.0).contains(&voice.volume) {
        return Err(invalid(&format!("{field}.volume"), "must be in [0, 1]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let cfg = RelayConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, RelayConfig::default());
        assert_eq!(cfg.store.command_queue_capacity, 1024);
        assert_eq!(cfg.subscription.poll_interval_ms, 50);
        assert_eq!(cfg.identity.default_patient_name, "Patient");
        assert!((cfg.speech.confirmation.rate - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let err = RelayConfig::from_json_str(r#"{ "store": { "snapshot_buffer": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "store.snapshot_buffer"));
    }

    #[test]
    fn test_rejects_bad_pinned_id() {
        let err = RelayConfig::from_json_str(r#"{ "identity": { "pinned_patient_id": "a/b" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "identity.pinned_patient_id"));
    }

    #[test]
    fn test_rejects_bad_voice() {
        let err = RelayConfig::from_json_str(r#"{ "speech": { "announcement": { "rate": 0 } } }"#).unwrap_err();
        assert!(err.to_string().contains("speech.announcement.rate"));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(RelayConfig::from_json_str("{"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{ "subscription": { "poll_interval_ms": 20 } }"#).unwrap();
        assert_eq!(RelayConfig::from_path(&path).unwrap().subscription.poll_interval_ms, 20);

        let missing = RelayConfig::from_path(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
